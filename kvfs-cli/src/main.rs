mod cli;
mod handlers;

use std::sync::Arc;

use clap::Parser;
use kvfs_core::prelude::*;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let engine = StorageEngine::new(MemoryKv::new());
    engine.set_on_file_progress(Arc::new(|status: FileStatus| {
        if status.status == OpStatus::Error {
            tracing::warn!(path = ?status.path, msg = ?status.msg, "operation failed");
        } else {
            tracing::debug!(path = ?status.path, progress = status.progress, status = status.status.as_str(), "progress");
        }
    }));

    let result = match &cli.command {
        Command::Save { path, file, text, max_size, allowed_extensions } => {
            handlers::save(
                &engine,
                &cli,
                path,
                file.as_deref(),
                text.as_deref(),
                *max_size,
                allowed_extensions.clone(),
            )
            .await
        }
        Command::Read { path, out } => handlers::read(&engine, &cli, path, out.as_deref()).await,
        Command::Ls { path, paginate } => handlers::ls(&engine, &cli, path, *paginate).await,
        Command::Rm { path } => handlers::rm(&engine, &cli, path).await,
        Command::RmDir { path } => handlers::rmdir(&engine, &cli, path).await,
        Command::GetMeta { path } => handlers::get_meta(&engine, path).await,
        Command::SetMeta { path, json } => handlers::set_meta(&engine, path, json).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
