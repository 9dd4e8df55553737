//! A chunked file store layered over an ordered key-value substrate: save,
//! read, list, and delete byte streams organized into hierarchical paths,
//! while the substrate itself is only a flat ordered KV map.

pub mod chunker;
pub mod engine;
pub mod error;
pub mod kv;
pub mod kv_pager;
pub mod options;
pub mod path;
pub mod progress;
pub mod rate_limiter;
pub mod registry;
pub mod sweeper;

pub mod prelude {
    pub use crate::engine::{
        ContentStream, DeleteOutcome, DirEntry, DirList, FileRecord, ReadDirOutcome, ReadOutcome,
        SaveOutcome, StorageEngine,
    };
    pub use crate::error::{FsError, Result, SubstrateError};
    pub use crate::kv::{Cursor, Key, KeyPart, KeyRange, KvStore, MemoryKv};
    pub use crate::options::{
        Content, DeleteDirOptions, DeleteOptions, ReadDirOptions, ReadOptions, SaveOptions,
        ValidateAccess, read_stream, read_stream_as_string,
    };
    pub use crate::progress::{FileStatus, OpStatus, ProgressSink};
}
