//! Orchestrates save/read/delete/readDir/deleteDir over the injected
//! [`KvStore`], enforcing validation, size ceilings, extension filters,
//! stale-tail retraction, and metadata handling.
//!
//! Grounded on the teacher's `crud/mod.rs` `CrudArchive`: one façade struct
//! holding the collaborators (substrate, in-flight state, progress sink)
//! and exposing the public operations as methods that thread a single
//! `Options`-shaped argument through a sequence of validation gates.

use std::pin::Pin;
use std::sync::{Arc, Weak};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::chunker::{self, ChunkReader, StreamReader};
use crate::error::{FsError, SubstrateError};
use crate::kv::{Key, KeyPart, KeyRange, KvStore, key};
use crate::kv_pager::page_iterator;
use crate::options::{
    Content, DeleteDirOptions, DeleteOptions, ReadDirOptions, ReadOptions, SaveOptions,
    always_allow,
};
use crate::path;
use crate::progress::{FileStatus, OpStatus, ProgressSink, noop_sink};
use crate::rate_limiter::RateLimiter;
use crate::registry::InFlightRegistry;

const MAX_INDEX: u64 = u64::MAX;

/// The durable record stored at `("kvfs", "files", ...path)`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileRecord {
    pub path: Vec<String>,
    pub size: u64,
    pub flags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub uri_component: String,
}

/// Enough of a save/delete's options to resume a delete on recovery; the
/// stream and callback are elided since neither survives a crash.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct UnresolvedMarker {
    pub path: Vec<String>,
    pub client_id: Option<String>,
}

pub type ContentStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, FsError>> + Send>>;

pub struct ReadRecord {
    pub record: FileRecord,
    pub content: ContentStream,
}

pub enum SaveOutcome {
    Saved(FileRecord),
    Status(FileStatus),
}

pub enum ReadOutcome {
    Found(ReadRecord),
    Status(FileStatus),
    NotFound,
}

pub enum DeleteOutcome {
    Deleted,
    Status(FileStatus),
}

pub enum DirEntry {
    File(ReadRecord),
    Status(FileStatus),
}

pub enum ReadDirOutcome {
    List(DirList),
    Status(FileStatus),
}

pub struct DirList {
    pub entries: Vec<DirEntry>,
    pub total_size: u64,
    pub cursor: Option<crate::kv::Cursor>,
}

fn files_key(path: &[String]) -> Key {
    let mut k = key([KeyPart::from("kvfs"), KeyPart::from("files")]);
    k.extend(path.iter().cloned().map(KeyPart::from));
    k
}

fn chunks_prefix(uri: &str) -> Key {
    key([
        KeyPart::from("kvfs"),
        KeyPart::from("chunks"),
        KeyPart::from(uri.to_string()),
    ])
}

fn chunks_key(uri: &str, index: u64) -> Key {
    let mut k = chunks_prefix(uri);
    k.push(KeyPart::from(index));
    k
}

fn unresolved_key(uri: &str) -> Key {
    key([
        KeyPart::from("kvfs"),
        KeyPart::from("unresolved"),
        KeyPart::from(uri.to_string()),
    ])
}

pub(crate) fn unresolved_prefix() -> Key {
    key([KeyPart::from("kvfs"), KeyPart::from("unresolved")])
}

fn json_size(v: &serde_json::Value) -> usize {
    serde_json::to_vec(v).map(|b| b.len()).unwrap_or(usize::MAX)
}

fn record_to_bytes(record: &FileRecord) -> Result<Vec<u8>, FsError> {
    serde_json::to_vec(record).map_err(|e| FsError::Substrate(SubstrateError::new(e.to_string())))
}

fn record_from_bytes(bytes: &[u8]) -> Result<FileRecord, FsError> {
    serde_json::from_slice(bytes).map_err(|e| FsError::Substrate(SubstrateError::new(e.to_string())))
}

fn bytes_chunk_stream(chunks: Vec<Vec<u8>>) -> ContentStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

fn reader_chunk_stream<R>(reader: R) -> ContentStream
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut cr = ChunkReader::new(reader);
        while let Some(chunk) = cr
            .next_chunk()
            .await
            .map_err(|e| FsError::Substrate(SubstrateError::new(e.to_string())))?
        {
            yield chunk;
        }
    })
}

pub struct StorageEngine {
    kv: Arc<dyn KvStore>,
    registry: Arc<InFlightRegistry>,
    progress: Mutex<ProgressSink>,
    self_weak: Weak<StorageEngine>,
}

impl StorageEngine {
    /// Constructs the engine and, without awaiting it, begins the recovery
    /// sweep for any markers left by a prior crash.
    pub fn new(kv: Arc<dyn KvStore>) -> Arc<Self> {
        let engine = Arc::new_cyclic(|weak| Self {
            kv,
            registry: Arc::new(InFlightRegistry::new()),
            progress: Mutex::new(noop_sink()),
            self_weak: weak.clone(),
        });
        let weak = engine.self_weak.clone();
        tokio::spawn(async move {
            if let Some(engine) = weak.upgrade() {
                crate::sweeper::sweep(&engine).await;
            }
        });
        engine
    }

    pub fn set_on_file_progress(&self, sink: ProgressSink) {
        *self.progress.lock() = sink;
    }

    pub(crate) fn kv_store(&self) -> Arc<dyn KvStore> {
        self.kv.clone()
    }

    fn emit(&self, status: FileStatus) {
        let sink = self.progress.lock().clone();
        sink(status);
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_weak
            .upgrade()
            .expect("engine dropped while an operation was in flight")
    }

    pub fn path_to_uri_component(path: &[String]) -> String {
        path::encode(path)
    }

    pub fn uri_component_to_path(uri: &str) -> Vec<String> {
        path::decode(uri)
    }

    pub fn get_client_reqs(&self, client_id: &str) -> u64 {
        self.registry.client_reqs(Some(client_id))
    }

    pub fn get_all_file_statuses(&self) -> Vec<FileStatus> {
        self.registry.all_statuses()
    }

    #[tracing::instrument(skip(self, opts), fields(path = ?opts.path))]
    pub async fn save(&self, opts: SaveOptions) -> SaveOutcome {
        tracing::info!("save started");
        let uri = path::encode(&opts.path);
        if let Some(status) = self.registry.status(&uri) {
            tracing::debug!(uri = %uri, "save short-circuited by an in-flight operation");
            return SaveOutcome::Status(status);
        }
        if let Some(meta) = &opts.metadata {
            if json_size(meta) > crate::kv::METADATA_MAX_SIZE {
                return self.save_error(&uri, &opts.path, "metadata exceeds 60KB limit");
            }
        }
        if !(opts.validate_access)(&opts.path) {
            return self.save_error(&uri, &opts.path, FsError::Forbidden.to_string());
        }
        if !opts.allowed_extensions.is_empty() {
            let ext = opts
                .path
                .last()
                .and_then(|last| last.rsplit('.').next())
                .unwrap_or("");
            if !opts.allowed_extensions.iter().any(|e| e == ext) {
                return self.save_error(&uri, &opts.path, FsError::ExtensionNotAllowed.to_string());
            }
        }

        let client_id = opts.client_id.as_deref();
        let count = match self.registry.start_saving(&uri, &opts.path, client_id) {
            Err(status) => return SaveOutcome::Status(status),
            Ok(count) => count,
        };
        if let Some(max) = opts.max_client_id_concurrent_reqs {
            if count > max {
                self.registry.end_saving(&uri, client_id);
                return self.save_error(
                    &uri,
                    &opts.path,
                    format!("you can only make a maximum of {max} concurrent requests"),
                );
            }
        }

        let marker = UnresolvedMarker {
            path: opts.path.clone(),
            client_id: opts.client_id.clone(),
        };
        if let Ok(bytes) = serde_json::to_vec(&marker) {
            if let Err(e) = self.kv.set(&unresolved_key(&uri), bytes).await {
                self.registry.end_saving(&uri, client_id);
                return self.save_error(&uri, &opts.path, e.to_string());
            }
        }

        let chunks = match opts.content {
            Content::Bytes(b) => bytes_chunk_stream(chunker::chunk_bytes(&b)),
            Content::Text(s) => bytes_chunk_stream(chunker::chunk_string(&s)),
            Content::Stream(s) => reader_chunk_stream(StreamReader::new(s)),
        };

        match self
            .save_body(&uri, &opts.path, chunks, opts.chunks_per_second, opts.max_file_size_bytes)
            .await
        {
            Ok((size, flags)) => {
                let record = FileRecord {
                    path: opts.path.clone(),
                    size,
                    flags: flags.clone(),
                    metadata: opts.metadata.clone(),
                    uri_component: uri.clone(),
                };
                let bytes = match record_to_bytes(&record) {
                    Ok(b) => b,
                    Err(e) => {
                        self.registry.end_saving(&uri, client_id);
                        return self.save_error(&uri, &opts.path, e.to_string());
                    }
                };
                if let Err(e) = self.kv.set(&files_key(&opts.path), bytes).await {
                    self.registry.end_saving(&uri, client_id);
                    self.spawn_compensating_delete(&opts.path, opts.client_id.clone());
                    return self.save_error(&uri, &opts.path, e.to_string());
                }
                self.registry.end_saving(&uri, client_id);
                let _ = self.kv.delete(&unresolved_key(&uri)).await;

                if flags.iter().any(|f| f == "incomplete") {
                    return self.save_error(
                        &uri,
                        &opts.path,
                        FsError::Incomplete("exceeded max_file_size_bytes".into()).to_string(),
                    );
                }
                tracing::info!(uri = %uri, size, "save completed");
                self.emit(FileStatus::saving(&uri, opts.path.clone(), size));
                SaveOutcome::Saved(record)
            }
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "save failed, scheduling compensating delete");
                self.registry.end_saving(&uri, client_id);
                self.spawn_compensating_delete(&opts.path, opts.client_id.clone());
                self.save_error(&uri, &opts.path, e.to_string())
            }
        }
    }

    fn save_error(&self, uri: &str, path: &[String], msg: impl Into<String>) -> SaveOutcome {
        let status = FileStatus::error(uri, path.to_vec(), msg);
        self.emit(status.clone());
        SaveOutcome::Status(status)
    }

    fn spawn_compensating_delete(&self, path: &[String], client_id: Option<String>) {
        let engine = self.arc_self();
        let opts = DeleteOptions {
            path: path.to_vec(),
            chunks_per_second: None,
            client_id,
            validate_access: always_allow(),
            max_client_id_concurrent_reqs: None,
        };
        tokio::spawn(async move {
            engine.delete(opts).await;
        });
    }

    async fn save_body(
        &self,
        uri: &str,
        path: &[String],
        mut chunks: ContentStream,
        chunks_per_second: Option<u64>,
        max_file_size_bytes: Option<u64>,
    ) -> Result<(u64, Vec<String>), FsError> {
        let mut rl = RateLimiter::new(chunks_per_second);
        let mut index: u64 = 1;
        let mut size_bytes: u64 = 0;
        let mut flags = Vec::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if let Some(max) = max_file_size_bytes {
                if size_bytes > max {
                    flags.push("incomplete".to_string());
                    break;
                }
            }
            let chunk_len = chunk.len() as u64;
            self.kv.set(&chunks_key(uri, index), chunk).await?;
            size_bytes += chunk_len;
            self.registry.update_saving_progress(uri, size_bytes);
            index += 1;
            if rl.tick().await.should_pulse() {
                self.emit(FileStatus::saving(uri, path.to_vec(), size_bytes));
            }
        }

        self.retract_tail(uri, path, index, &mut rl).await?;
        Ok((size_bytes, flags))
    }

    /// Removes any chunk with an index `>= next_index`, the tail left behind
    /// when a re-save is shorter than the file it replaces.
    async fn retract_tail(
        &self,
        uri: &str,
        path: &[String],
        next_index: u64,
        rl: &mut RateLimiter,
    ) -> Result<(), FsError> {
        let range = KeyRange::Range {
            start: chunks_key(uri, next_index),
            end: chunks_key(uri, MAX_INDEX),
        };
        let pages = page_iterator(self.kv.clone(), range, 1000);
        futures::pin_mut!(pages);
        let mut deleted = 0u64;
        while let Some(entry) = pages.next().await {
            let entry = entry?;
            self.kv.delete(&entry.key).await?;
            deleted += entry.value.len() as u64;
            if rl.tick().await.should_pulse() {
                self.emit(
                    FileStatus::saving(uri, path.to_vec(), deleted)
                        .with_msg(format!("deleting previous data, {deleted} bytes deleted")),
                );
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, opts), fields(path = ?opts.path))]
    pub async fn read(&self, opts: ReadOptions) -> ReadOutcome {
        tracing::info!("read started");
        let uri = path::encode(&opts.path);
        if let Some(status) = self.registry.status(&uri) {
            tracing::debug!(uri = %uri, "read short-circuited by an in-flight operation");
            return ReadOutcome::Status(status);
        }
        if !(opts.validate_access)(&opts.path) {
            let status = FileStatus::error(&uri, opts.path.clone(), FsError::Forbidden.to_string());
            self.emit(status.clone());
            return ReadOutcome::Status(status);
        }
        let raw = match self.kv.get(&files_key(&opts.path)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(uri = %uri, "read found no record");
                return ReadOutcome::NotFound;
            }
            Err(e) => {
                let status = FileStatus::error(&uri, opts.path.clone(), e.to_string());
                self.emit(status.clone());
                return ReadOutcome::Status(status);
            }
        };
        let record = match record_from_bytes(&raw) {
            Ok(r) => r,
            Err(e) => {
                let status = FileStatus::error(&uri, opts.path.clone(), e.to_string());
                self.emit(status.clone());
                return ReadOutcome::Status(status);
            }
        };
        tracing::info!(uri = %uri, size = record.size, "read found record");
        let content = self.open_content_stream(
            uri,
            opts.client_id.clone(),
            opts.max_client_id_concurrent_reqs,
            opts.chunks_per_second,
        );
        ReadOutcome::Found(ReadRecord { record, content })
    }

    /// A pull-driven stream walking `("chunks", uri, *)` in order. The slot
    /// accounting (`client_reqs`) happens lazily on the first poll, since
    /// the generator body doesn't run until then.
    fn open_content_stream(
        &self,
        uri: String,
        client_id: Option<String>,
        max_concurrent: Option<u64>,
        chunks_per_second: Option<u64>,
    ) -> ContentStream {
        let kv = self.kv.clone();
        let registry = self.registry.clone();
        Box::pin(async_stream::try_stream! {
            let count = registry.incr_client(client_id.as_deref());
            if let Some(max) = max_concurrent {
                if count > max {
                    registry.decr_client(client_id.as_deref());
                    Err(FsError::ConcurrencyCapExceeded(max))?;
                }
            }
            let mut rl = RateLimiter::new(chunks_per_second);
            let range = KeyRange::Prefix(chunks_prefix(&uri));
            let pages = page_iterator(kv, range, 1000);
            futures::pin_mut!(pages);
            loop {
                match pages.next().await {
                    Some(Ok(entry)) => {
                        rl.tick().await;
                        yield entry.value;
                    }
                    Some(Err(err)) => {
                        registry.decr_client(client_id.as_deref());
                        Err(FsError::from(err))?;
                    }
                    None => {
                        registry.decr_client(client_id.as_deref());
                        break;
                    }
                }
            }
        })
    }

    #[tracing::instrument(skip(self, opts), fields(path = ?opts.path))]
    pub async fn read_dir(&self, opts: ReadDirOptions) -> ReadDirOutcome {
        tracing::info!("read_dir started");
        let dir_uri = path::encode(&opts.path);
        if !(opts.validate_access)(&opts.path) {
            let status = FileStatus::error(&dir_uri, opts.path.clone(), FsError::Forbidden.to_string());
            self.emit(status.clone());
            return ReadDirOutcome::Status(status);
        }
        let mut rl = RateLimiter::new(opts.max_dir_entries_per_second);
        let range = KeyRange::Prefix(files_key(&opts.path));
        let mut cursor = opts.cursor.clone();
        let mut entries = Vec::new();
        let mut total_size: u64 = 0;

        loop {
            let page = match self.kv.list(range.clone(), 1000, cursor.clone()).await {
                Ok(p) => p,
                Err(e) => {
                    let status = FileStatus::error(&dir_uri, opts.path.clone(), e.to_string());
                    self.emit(status.clone());
                    return ReadDirOutcome::Status(status);
                }
            };
            for (_, value) in &page.entries {
                rl.tick().await;
                let record = match record_from_bytes(value) {
                    Ok(r) => r,
                    Err(e) => {
                        let status = FileStatus::error(&dir_uri, opts.path.clone(), e.to_string());
                        self.emit(status.clone());
                        return ReadDirOutcome::Status(status);
                    }
                };
                let uri = record.uri_component.clone();
                if let Some(status) = self.registry.status(&uri) {
                    if status.status == OpStatus::Saving {
                        total_size += status.progress;
                    }
                    entries.push(DirEntry::Status(status));
                } else {
                    total_size += record.size;
                    let content = self.open_content_stream(
                        uri,
                        opts.client_id.clone(),
                        opts.max_client_id_concurrent_reqs,
                        opts.chunks_per_second,
                    );
                    entries.push(DirEntry::File(ReadRecord { record, content }));
                }
            }
            if opts.pagination {
                tracing::info!(dir_uri = %dir_uri, entries = entries.len(), total_size, "read_dir returning a page");
                return ReadDirOutcome::List(DirList {
                    entries,
                    total_size,
                    cursor: page.cursor,
                });
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => {
                    tracing::info!(dir_uri = %dir_uri, entries = entries.len(), total_size, "read_dir completed");
                    return ReadDirOutcome::List(DirList {
                        entries,
                        total_size,
                        cursor: None,
                    });
                }
            }
        }
    }

    #[tracing::instrument(skip(self, opts), fields(path = ?opts.path))]
    pub async fn delete(&self, opts: DeleteOptions) -> DeleteOutcome {
        tracing::info!("delete started");
        let uri = path::encode(&opts.path);
        if let Some(status) = self.registry.status(&uri) {
            tracing::debug!(uri = %uri, "delete short-circuited by an in-flight operation");
            return DeleteOutcome::Status(status);
        }
        if !(opts.validate_access)(&opts.path) {
            let status = FileStatus::error(&uri, opts.path.clone(), FsError::Forbidden.to_string());
            self.emit(status.clone());
            return DeleteOutcome::Status(status);
        }
        let client_id = opts.client_id.as_deref();
        let count = match self.registry.start_deleting(&uri, &opts.path, client_id) {
            Err(status) => return DeleteOutcome::Status(status),
            Ok(count) => count,
        };
        if let Some(max) = opts.max_client_id_concurrent_reqs {
            if count > max {
                self.registry.end_deleting(&uri, client_id);
                let status = FileStatus::error(
                    &uri,
                    opts.path.clone(),
                    format!("you can only make a maximum of {max} concurrent requests"),
                );
                self.emit(status.clone());
                return DeleteOutcome::Status(status);
            }
        }

        let marker = UnresolvedMarker {
            path: opts.path.clone(),
            client_id: opts.client_id.clone(),
        };
        if let Ok(bytes) = serde_json::to_vec(&marker) {
            let _ = self.kv.set(&unresolved_key(&uri), bytes).await;
        }

        match self.delete_body(&uri, &opts.path, opts.chunks_per_second).await {
            Ok(()) => {
                self.registry.end_deleting(&uri, client_id);
                let _ = self.kv.delete(&unresolved_key(&uri)).await;
                tracing::info!(uri = %uri, "delete completed");
                DeleteOutcome::Deleted
            }
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "delete failed");
                self.registry.end_deleting(&uri, client_id);
                let status = FileStatus::error(&uri, opts.path.clone(), e.to_string());
                self.emit(status.clone());
                DeleteOutcome::Status(status)
            }
        }
    }

    async fn delete_body(
        &self,
        uri: &str,
        path: &[String],
        rate: Option<u64>,
    ) -> Result<(), FsError> {
        self.kv.delete(&files_key(path)).await?;
        let mut rl = RateLimiter::new(rate);
        let range = KeyRange::Prefix(chunks_prefix(uri));
        let pages = page_iterator(self.kv.clone(), range, 1000);
        futures::pin_mut!(pages);
        let mut deleted = 0u64;
        while let Some(entry) = pages.next().await {
            let entry = entry?;
            self.kv.delete(&entry.key).await?;
            deleted += entry.value.len() as u64;
            self.registry.update_deleting_progress(uri, deleted);
            if rl.tick().await.should_pulse() {
                self.emit(FileStatus::deleting(uri, path.to_vec(), deleted));
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, opts), fields(path = ?opts.path))]
    pub async fn delete_dir(&self, opts: DeleteDirOptions) -> Vec<FileStatus> {
        tracing::info!("delete_dir started");
        let dir_uri = path::encode(&opts.path);
        if !(opts.validate_access)(&opts.path) {
            let status = FileStatus::error(&dir_uri, opts.path.clone(), FsError::Forbidden.to_string());
            self.emit(status.clone());
            return vec![status];
        }
        let mut rl = RateLimiter::new(opts.max_dir_entries_per_second);
        let range = KeyRange::Prefix(files_key(&opts.path));
        let mut cursor = None;
        let mut results = Vec::new();

        loop {
            let page = match self.kv.list(range.clone(), 1000, cursor.clone()).await {
                Ok(p) => p,
                Err(e) => {
                    results.push(FileStatus::error(&dir_uri, opts.path.clone(), e.to_string()));
                    return results;
                }
            };
            for (_, value) in &page.entries {
                rl.tick().await;
                let record = match record_from_bytes(value) {
                    Ok(r) => r,
                    Err(e) => {
                        results.push(FileStatus::error(&dir_uri, opts.path.clone(), e.to_string()));
                        continue;
                    }
                };
                let uri = record.uri_component.clone();
                let del_opts = DeleteOptions {
                    path: record.path.clone(),
                    chunks_per_second: None,
                    client_id: opts.client_id.clone(),
                    validate_access: always_allow(),
                    max_client_id_concurrent_reqs: opts.max_client_id_concurrent_reqs,
                };
                match self.delete(del_opts).await {
                    DeleteOutcome::Deleted => {
                        results.push(FileStatus::deleting(&uri, record.path, record.size));
                    }
                    DeleteOutcome::Status(status) => results.push(status),
                }
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::info!(dir_uri = %dir_uri, deleted = results.len(), "delete_dir completed");
        results
    }

    pub async fn get_metadata(&self, path: &[String]) -> Result<Option<serde_json::Value>, FsError> {
        match self.kv.get(&files_key(path)).await? {
            Some(bytes) => Ok(record_from_bytes(&bytes)?.metadata),
            None => Ok(None),
        }
    }

    /// Unlike the other operations, this one raises rather than returning a
    /// status — it's a direct metadata mutation, not a streaming pipeline.
    pub async fn set_metadata(
        &self,
        path: &[String],
        metadata: serde_json::Value,
    ) -> Result<(), FsError> {
        if json_size(&metadata) > crate::kv::METADATA_MAX_SIZE {
            return Err(FsError::MetadataTooLarge);
        }
        let Some(bytes) = self.kv.get(&files_key(path)).await? else {
            return Ok(());
        };
        let mut record = record_from_bytes(&bytes)?;
        record.metadata = Some(metadata);
        self.kv.set(&files_key(path), record_to_bytes(&record)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn p(segs: &[&str]) -> Vec<String> {
        segs.iter().map(|s| s.to_string()).collect()
    }

    async fn drain(mut content: ContentStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = content.next().await {
            out.extend(chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn simple_save_and_read_round_trips() {
        let engine = StorageEngine::new(MemoryKv::new());
        let outcome = engine
            .save(SaveOptions::new(p(&["a", "b.txt"]), "hello"))
            .await;
        let record = match outcome {
            SaveOutcome::Saved(r) => r,
            SaveOutcome::Status(s) => panic!("expected save, got status: {:?}", s.msg),
        };
        assert_eq!(record.size, 5);
        assert!(record.flags.is_empty());

        match engine.read(ReadOptions::new(p(&["a", "b.txt"]))).await {
            ReadOutcome::Found(rec) => {
                assert_eq!(drain(rec.content).await, b"hello".to_vec());
            }
            _ => panic!("expected a found record"),
        }
    }

    #[tokio::test]
    async fn chunk_boundary_produces_exactly_two_chunks() {
        let engine = StorageEngine::new(MemoryKv::new());
        let data = vec![9u8; chunker::CHUNK_SIZE * 2];
        let outcome = engine
            .save(SaveOptions::new(p(&["big"]), data.clone()))
            .await;
        let record = match outcome {
            SaveOutcome::Saved(r) => r,
            _ => panic!("expected save"),
        };
        assert_eq!(record.size, (chunker::CHUNK_SIZE * 2) as u64);
        let read = engine.read(ReadOptions::new(p(&["big"]))).await;
        match read {
            ReadOutcome::Found(rec) => assert_eq!(drain(rec.content).await, data),
            _ => panic!("expected found"),
        }
    }

    #[tokio::test]
    async fn shortening_a_file_retracts_the_tail() {
        let kv = MemoryKv::new();
        let engine = StorageEngine::new(kv.clone());
        engine
            .save(SaveOptions::new(p(&["f"]), vec![1u8; chunker::CHUNK_SIZE * 3]))
            .await;
        engine.save(SaveOptions::new(p(&["f"]), vec![2u8; 5])).await;

        let uri = path::encode(&p(&["f"]));
        let page = kv
            .list(KeyRange::Prefix(chunks_prefix(&uri)), 100, None)
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
    }

    #[tokio::test]
    async fn truncation_tags_incomplete_and_stops_writing() {
        let engine = StorageEngine::new(MemoryKv::new());
        let mut opts = SaveOptions::new(p(&["huge"]), vec![0u8; 200_000]);
        opts.max_file_size_bytes = Some(100_000);
        let outcome = engine.save(opts).await;
        match outcome {
            SaveOutcome::Status(status) => assert_eq!(status.status, OpStatus::Error),
            SaveOutcome::Saved(_) => panic!("expected an incomplete-error status"),
        }
        match engine.read(ReadOptions::new(p(&["huge"]))).await {
            ReadOutcome::Found(rec) => assert!(rec.record.flags.iter().any(|f| f == "incomplete")),
            _ => panic!("expected a partial record to exist"),
        }
    }

    #[tokio::test]
    async fn forbidden_access_blocks_save_without_writes() {
        let kv = MemoryKv::new();
        let engine = StorageEngine::new(kv.clone());
        let mut opts = SaveOptions::new(p(&["secret"]), "x");
        opts.validate_access = std::sync::Arc::new(|_| false);
        match engine.save(opts).await {
            SaveOutcome::Status(status) => assert_eq!(status.msg.as_deref(), Some("forbidden")),
            SaveOutcome::Saved(_) => panic!("expected forbidden"),
        }
        assert!(kv.get(&files_key(&p(&["secret"]))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extension_filter_rejects_mismatched_suffix() {
        let engine = StorageEngine::new(MemoryKv::new());
        let mut opts = SaveOptions::new(p(&["photo.png"]), "x");
        opts.allowed_extensions = vec!["jpg".to_string()];
        match engine.save(opts).await {
            SaveOutcome::Status(status) => assert_eq!(status.status, OpStatus::Error),
            SaveOutcome::Saved(_) => panic!("expected extension rejection"),
        }
    }

    #[tokio::test]
    async fn idempotent_delete_removes_file_and_chunks() {
        let kv = MemoryKv::new();
        let engine = StorageEngine::new(kv.clone());
        engine.save(SaveOptions::new(p(&["d"]), "data")).await;
        engine.delete(DeleteOptions::new(p(&["d"]))).await;
        engine.delete(DeleteOptions::new(p(&["d"]))).await;
        assert!(kv.get(&files_key(&p(&["d"]))).await.unwrap().is_none());
        let uri = path::encode(&p(&["d"]));
        let page = kv
            .list(KeyRange::Prefix(chunks_prefix(&uri)), 100, None)
            .await
            .unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test]
    async fn in_flight_save_short_circuits_concurrent_calls() {
        let engine = StorageEngine::new(MemoryKv::new());
        let uri = path::encode(&p(&["busy"]));
        engine
            .registry
            .start_saving(&uri, &p(&["busy"]), None)
            .unwrap();
        match engine.read(ReadOptions::new(p(&["busy"]))).await {
            ReadOutcome::Status(status) => assert_eq!(status.status, OpStatus::Saving),
            _ => panic!("expected the in-flight status to short-circuit the read"),
        }
    }

    #[tokio::test]
    async fn concurrency_cap_rejects_the_nth_plus_one_request() {
        let engine = StorageEngine::new(MemoryKv::new());
        let mut opts = SaveOptions::new(p(&["a"]), "x");
        opts.client_id = Some("c".to_string());
        opts.max_client_id_concurrent_reqs = Some(0);
        match engine.save(opts).await {
            SaveOutcome::Status(status) => {
                assert_eq!(status.status, OpStatus::Error);
                assert!(status.msg.unwrap().contains("concurrent"));
            }
            SaveOutcome::Saved(_) => panic!("expected the cap to reject this save"),
        }
    }

    #[tokio::test]
    async fn directory_listing_paginates() {
        let engine = StorageEngine::new(MemoryKv::new());
        for i in 0..10 {
            engine
                .save(SaveOptions::new(vec!["dir".to_string(), i.to_string()], "x"))
                .await;
        }
        let mut opts = ReadDirOptions::new(p(&["dir"]));
        opts.pagination = true;
        let first = match engine.read_dir(opts).await {
            ReadDirOutcome::List(list) => list,
            ReadDirOutcome::Status(_) => panic!("expected a list"),
        };
        assert_eq!(first.entries.len(), 10);
        assert!(first.cursor.is_none());
    }

    #[tokio::test]
    async fn set_and_get_metadata_round_trip() {
        let engine = StorageEngine::new(MemoryKv::new());
        engine.save(SaveOptions::new(p(&["m"]), "x")).await;
        let meta = serde_json::json!({"k": "v"});
        engine.set_metadata(&p(&["m"]), meta.clone()).await.unwrap();
        assert_eq!(engine.get_metadata(&p(&["m"])).await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn set_metadata_over_cap_raises() {
        let engine = StorageEngine::new(MemoryKv::new());
        engine.save(SaveOptions::new(p(&["m"]), "x")).await;
        let huge = serde_json::json!({"k": "v".repeat(70 * 1024)});
        assert!(engine.set_metadata(&p(&["m"]), huge).await.is_err());
    }
}
