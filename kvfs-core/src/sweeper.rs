//! The startup recovery sweep: scans for "unresolved" markers left behind by
//! a crashed save or delete and resumes each as a delete, so orphaned chunk
//! tails don't linger forever.
//!
//! Grounded on the teacher's `crud/mod.rs` journal-replay-on-open pattern —
//! here there's no journal to replay, just a marker per in-flight operation,
//! but the "settle outstanding work before serving new requests" shape is
//! the same idea.

use futures::StreamExt;

use crate::engine::{StorageEngine, UnresolvedMarker, unresolved_prefix};
use crate::kv::KeyRange;
use crate::kv_pager::page_iterator;
use crate::options::{DeleteOptions, always_allow};

pub async fn sweep(engine: &StorageEngine) {
    let kv = engine.kv_store();
    let range = KeyRange::Prefix(unresolved_prefix());
    let pages = page_iterator(kv, range, 1000);
    futures::pin_mut!(pages);

    while let Some(entry) = pages.next().await {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "recovery sweep: scan failed");
                continue;
            }
        };
        let marker: UnresolvedMarker = match serde_json::from_slice(&entry.value) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "recovery sweep: unreadable marker, skipping");
                continue;
            }
        };
        let opts = DeleteOptions {
            path: marker.path,
            chunks_per_second: None,
            client_id: marker.client_id,
            validate_access: always_allow(),
            max_client_id_concurrent_reqs: None,
        };
        engine.delete(opts).await;
    }
}
