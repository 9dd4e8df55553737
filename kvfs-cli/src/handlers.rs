//! Command implementations, one per `cli::Command` variant.
//!
//! Grounded on the teacher's `application/handlers.rs`: thin async
//! functions that translate parsed CLI input into calls against the core
//! library and print a human-readable result.

use std::path::Path;
use std::sync::Arc;

use kvfs_core::prelude::*;
use thiserror::Error;

use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store reported an error: {0}")]
    Store(String),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Splits a slash-separated CLI argument into store path segments.
pub fn split_path(s: &str) -> Vec<String> {
    s.split('/').filter(|seg| !seg.is_empty()).map(str::to_string).collect()
}

fn status_error(status: FileStatus) -> CliError {
    CliError::Store(status.msg.unwrap_or_else(|| status.status.as_str().to_string()))
}

pub async fn save(
    engine: &Arc<StorageEngine>,
    cli: &Cli,
    path: &str,
    file: Option<&Path>,
    text: Option<&str>,
    max_size: Option<u64>,
    allowed_extensions: Vec<String>,
) -> std::result::Result<(), CliError> {
    let content: Content = match file {
        Some(file) => Content::Bytes(tokio::fs::read(file).await?),
        None => Content::Text(text.unwrap_or_default().to_string()),
    };
    let mut opts = SaveOptions::new(split_path(path), content);
    opts.chunks_per_second = cli.rate;
    opts.client_id = cli.client_id.clone();
    opts.max_client_id_concurrent_reqs = cli.max_concurrent;
    opts.max_file_size_bytes = max_size;
    opts.allowed_extensions = allowed_extensions;

    match engine.save(opts).await {
        SaveOutcome::Saved(record) => {
            println!("saved {} bytes at {}", record.size, record.uri_component);
            Ok(())
        }
        SaveOutcome::Status(status) => Err(status_error(status)),
    }
}

pub async fn read(
    engine: &Arc<StorageEngine>,
    cli: &Cli,
    path: &str,
    out: Option<&Path>,
) -> std::result::Result<(), CliError> {
    let mut opts = ReadOptions::new(split_path(path));
    opts.chunks_per_second = cli.rate;
    opts.client_id = cli.client_id.clone();
    opts.max_client_id_concurrent_reqs = cli.max_concurrent;

    match engine.read(opts).await {
        ReadOutcome::Found(rec) => {
            let bytes = read_stream(rec.content).await?;
            match out {
                Some(p) => tokio::fs::write(p, &bytes).await?,
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                }
            }
            Ok(())
        }
        ReadOutcome::NotFound => Err(CliError::Store(format!("{path} not found"))),
        ReadOutcome::Status(status) => Err(status_error(status)),
    }
}

pub async fn ls(engine: &Arc<StorageEngine>, cli: &Cli, path: &str, paginate: bool) -> std::result::Result<(), CliError> {
    let mut opts = ReadDirOptions::new(split_path(path));
    opts.chunks_per_second = cli.rate;
    opts.max_dir_entries_per_second = cli.rate;
    opts.client_id = cli.client_id.clone();
    opts.max_client_id_concurrent_reqs = cli.max_concurrent;
    opts.pagination = paginate;

    match engine.read_dir(opts).await {
        ReadDirOutcome::List(list) => {
            for entry in list.entries {
                match entry {
                    DirEntry::File(rec) => {
                        println!("{}\t{}", rec.record.uri_component, rec.record.size)
                    }
                    DirEntry::Status(status) => {
                        println!("{}\t{}", status.uri_component, status.status.as_str())
                    }
                }
            }
            if list.cursor.is_some() {
                println!("# {} more bytes under this prefix; re-run with a narrower path to see them", list.total_size);
            }
            Ok(())
        }
        ReadDirOutcome::Status(status) => Err(status_error(status)),
    }
}

pub async fn rm(engine: &Arc<StorageEngine>, cli: &Cli, path: &str) -> std::result::Result<(), CliError> {
    let mut opts = DeleteOptions::new(split_path(path));
    opts.chunks_per_second = cli.rate;
    opts.client_id = cli.client_id.clone();
    opts.max_client_id_concurrent_reqs = cli.max_concurrent;

    match engine.delete(opts).await {
        DeleteOutcome::Deleted => {
            println!("deleted {path}");
            Ok(())
        }
        DeleteOutcome::Status(status) => Err(status_error(status)),
    }
}

pub async fn rmdir(engine: &Arc<StorageEngine>, cli: &Cli, path: &str) -> std::result::Result<(), CliError> {
    let mut opts = DeleteDirOptions::new(split_path(path));
    opts.max_dir_entries_per_second = cli.rate;
    opts.client_id = cli.client_id.clone();
    opts.max_client_id_concurrent_reqs = cli.max_concurrent;

    for status in engine.delete_dir(opts).await {
        println!("{}\t{}", status.uri_component, status.status.as_str());
    }
    Ok(())
}

pub async fn get_meta(engine: &Arc<StorageEngine>, path: &str) -> std::result::Result<(), CliError> {
    match engine.get_metadata(&split_path(path)).await? {
        Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
        None => println!("null"),
    }
    Ok(())
}

pub async fn set_meta(engine: &Arc<StorageEngine>, path: &str, json: &str) -> std::result::Result<(), CliError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    engine.set_metadata(&split_path(path), value).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> Cli {
        Cli {
            rate: None,
            max_concurrent: None,
            client_id: None,
            command: crate::cli::Command::Rm { path: String::new() },
        }
    }

    #[tokio::test]
    async fn save_from_a_local_file_then_read_it_back() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.txt");
        tokio::fs::write(&src, b"hello from disk").await.unwrap();
        let out = dir.path().join("out.txt");

        let engine = StorageEngine::new(MemoryKv::new());
        let cli = cli();
        save(&engine, &cli, "a/b.txt", Some(src.as_path()), None, None, vec![])
            .await
            .unwrap();
        read(&engine, &cli, "a/b.txt", Some(out.as_path())).await.unwrap();

        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"hello from disk");
    }

    #[tokio::test]
    async fn save_text_then_remove_it() {
        let engine = StorageEngine::new(MemoryKv::new());
        let cli = cli();
        save(&engine, &cli, "notes", None, Some("a note"), None, vec![])
            .await
            .unwrap();
        rm(&engine, &cli, "notes").await.unwrap();
        assert!(read(&engine, &cli, "notes", None).await.is_err());
    }

    #[tokio::test]
    async fn extension_filter_rejects_mismatched_file() {
        let engine = StorageEngine::new(MemoryKv::new());
        let cli = cli();
        let err = save(
            &engine,
            &cli,
            "photo.png",
            None,
            Some("x"),
            None,
            vec!["jpg".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::Store(_)));
    }

    #[tokio::test]
    async fn metadata_round_trips_through_json() {
        let engine = StorageEngine::new(MemoryKv::new());
        let cli = cli();
        save(&engine, &cli, "m", None, Some("x"), None, vec![]).await.unwrap();
        set_meta(&engine, "m", r#"{"tag":"demo"}"#).await.unwrap();
        assert!(engine.get_metadata(&split_path("m")).await.unwrap().is_some());
    }
}
