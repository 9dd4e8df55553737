//! An async iterator over a prefix/range scan that transparently re-issues
//! scans using the substrate's opaque resumption token, and exposes that
//! token to the caller at page boundaries so external pagination (see
//! `StorageEngine::read_dir`) doesn't need to re-issue scans itself.

use std::sync::Arc;

use futures::Stream;

use crate::error::SubstrateError;
use crate::kv::{Cursor, Key, KeyRange, KvStore};

/// One entry from the scan, tagged with the substrate cursor that would
/// resume immediately after it — populated only every `page_size` entries
/// (§4.5), `None` otherwise.
pub struct PagedEntry {
    pub key: Key,
    pub value: Vec<u8>,
    pub cursor: Option<Cursor>,
}

/// Internal batch size used for each underlying `KvStore::list` call. Kept
/// smaller than `page_size` so pagination cursors can land mid-batch.
const SCAN_BATCH: usize = 128;

pub fn page_iterator(
    kv: Arc<dyn KvStore>,
    range: KeyRange,
    page_size: usize,
) -> impl Stream<Item = Result<PagedEntry, SubstrateError>> {
    async_stream::try_stream! {
        let mut cursor: Option<Cursor> = None;
        let mut seen = 0usize;
        loop {
            let page = kv.list(range.clone(), SCAN_BATCH, cursor.clone()).await?;
            let entry_count = page.entries.len();
            for (i, (key, value)) in page.entries.into_iter().enumerate() {
                seen += 1;
                let is_last_in_batch = i + 1 == entry_count;
                let at_page_boundary = seen % page_size == 0;
                let cursor_here = if at_page_boundary {
                    if is_last_in_batch {
                        page.cursor.clone()
                    } else {
                        // A page boundary fell inside this batch; the
                        // substrate has no cursor for a mid-batch offset,
                        // so none is exposed at this entry.
                        None
                    }
                } else {
                    None
                };
                yield PagedEntry { key, value, cursor: cursor_here };
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KeyPart, MemoryKv, key};
    use futures::StreamExt;

    #[tokio::test]
    async fn visits_every_entry_exactly_once_in_order() {
        let kv = MemoryKv::new();
        for i in 0..500u64 {
            kv.set(&key([KeyPart::from("d"), KeyPart::from(i)]), vec![])
                .await
                .unwrap();
        }
        let stream = page_iterator(kv, KeyRange::Prefix(key([KeyPart::from("d")])), 100);
        futures::pin_mut!(stream);
        let mut count = 0u64;
        let mut last = None;
        while let Some(entry) = stream.next().await {
            let entry = entry.unwrap();
            let KeyPart::Int(n) = entry.key[1] else {
                panic!()
            };
            if let Some(l) = last {
                assert!(n > l, "entries must be strictly increasing");
            }
            last = Some(n);
            count += 1;
        }
        assert_eq!(count, 500);
    }

    #[tokio::test]
    async fn terminates_when_scan_returns_no_token() {
        let kv = MemoryKv::new();
        kv.set(&key([KeyPart::from("only")]), vec![1]).await.unwrap();
        let stream = page_iterator(kv, KeyRange::Prefix(key([KeyPart::from("o")])), 10);
        futures::pin_mut!(stream);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
    }
}
