//! Progress is a side channel: a single user-supplied callback invoked with
//! `FileStatus` snapshots, independent of the `Result`/`Option` returned by
//! each engine call.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Saving,
    Deleting,
    Error,
}

impl OpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OpStatus::Saving => "saving",
            OpStatus::Deleting => "deleting",
            OpStatus::Error => "error",
        }
    }
}

/// `{uri_component, path, progress, status, msg?}` (§6). `progress` is the
/// cumulative byte (or, for directory scans, entry) count for the current
/// operation.
#[derive(Debug, Clone)]
pub struct FileStatus {
    pub uri_component: String,
    pub path: Vec<String>,
    pub progress: u64,
    pub status: OpStatus,
    pub msg: Option<String>,
}

impl FileStatus {
    pub fn saving(uri_component: impl Into<String>, path: Vec<String>, progress: u64) -> Self {
        Self {
            uri_component: uri_component.into(),
            path,
            progress,
            status: OpStatus::Saving,
            msg: None,
        }
    }

    pub fn deleting(uri_component: impl Into<String>, path: Vec<String>, progress: u64) -> Self {
        Self {
            uri_component: uri_component.into(),
            path,
            progress,
            status: OpStatus::Deleting,
            msg: None,
        }
    }

    pub fn error(
        uri_component: impl Into<String>,
        path: Vec<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            uri_component: uri_component.into(),
            path,
            progress: 0,
            status: OpStatus::Error,
            msg: Some(msg.into()),
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }
}

/// A single process-wide progress callback. A consumer that needs fan-out
/// composes one itself (e.g. a closure that calls several others in turn).
pub type ProgressSink = Arc<dyn Fn(FileStatus) + Send + Sync>;

pub fn noop_sink() -> ProgressSink {
    Arc::new(|_| {})
}
