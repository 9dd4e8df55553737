use thiserror::Error;

/// Error surfaced by the injected [`crate::kv::KvStore`] collaborator.
///
/// The engine never interprets the contents of this error beyond its
/// `Display` text (used in `FileStatus::msg`); it exists so substrate
/// failures are distinguishable from the engine's own validation errors.
#[derive(Error, Debug, Clone)]
#[error("substrate error: {0}")]
pub struct SubstrateError(pub String);

impl SubstrateError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors that can be returned as `Result::Err`.
///
/// Most engine operations (`save`, `read`, `delete`, `read_dir`,
/// `delete_dir`) never produce this type — they report failure through a
/// [`crate::progress::FileStatus`] instead. `set_metadata` is the one
/// operation that raises.
#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("metadata exceeds 60KB limit")]
    MetadataTooLarge,

    #[error("forbidden")]
    Forbidden,

    #[error("extension not allowed")]
    ExtensionNotAllowed,

    #[error("you can only make a maximum of {0} concurrent requests")]
    ConcurrencyCapExceeded(u64),

    #[error("incomplete: {0}")]
    Incomplete(String),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

pub type Result<T> = std::result::Result<T, FsError>;
