//! The per-path in-flight state machine (idle/saving/deleting) and the
//! per-client concurrency counter.
//!
//! Grounded on the teacher's `index/inmem.rs`: a small in-memory structure
//! that `apply`s state transitions, except here the transitions must be
//! atomic across a `parking_lot::Mutex` rather than single-threaded-by-
//! construction, per the design notes in §9 of the spec.
//!
//! This registry owns only the in-memory bookkeeping. Writing and deleting
//! the durable "unresolved" KV marker is the engine's job — it straddles
//! the registry transition and a KV call, which cannot happen inside the
//! registry's synchronous critical section.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::progress::FileStatus;

struct Entry {
    path: Vec<String>,
    progress: u64,
}

#[derive(Default)]
struct State {
    saving: HashMap<String, Entry>,
    deleting: HashMap<String, Entry>,
    client_reqs: HashMap<String, u64>,
}

#[derive(Default)]
pub struct InFlightRegistry {
    inner: Mutex<State>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of `saving` or `deleting` for `uri`, if either is set.
    /// Invariant 4 (never both set) makes the check order irrelevant.
    pub fn status(&self, uri: &str) -> Option<FileStatus> {
        let st = self.inner.lock();
        if let Some(e) = st.saving.get(uri) {
            return Some(FileStatus::saving(uri, e.path.clone(), e.progress));
        }
        if let Some(e) = st.deleting.get(uri) {
            return Some(FileStatus::deleting(uri, e.path.clone(), e.progress));
        }
        None
    }

    /// Atomically checks for an existing in-flight entry and, if none,
    /// transitions `uri` to `saving` and bumps the client counter. Returns
    /// the post-increment client count (0 if `client_id` is `None`) on
    /// success, or the current status on short-circuit.
    pub fn start_saving(
        &self,
        uri: &str,
        path: &[String],
        client_id: Option<&str>,
    ) -> Result<u64, FileStatus> {
        let mut st = self.inner.lock();
        if let Some(e) = st.saving.get(uri) {
            return Err(FileStatus::saving(uri, e.path.clone(), e.progress));
        }
        if let Some(e) = st.deleting.get(uri) {
            return Err(FileStatus::deleting(uri, e.path.clone(), e.progress));
        }
        st.saving.insert(
            uri.to_string(),
            Entry {
                path: path.to_vec(),
                progress: 0,
            },
        );
        Ok(bump_client(&mut st.client_reqs, client_id))
    }

    pub fn start_deleting(
        &self,
        uri: &str,
        path: &[String],
        client_id: Option<&str>,
    ) -> Result<u64, FileStatus> {
        let mut st = self.inner.lock();
        if let Some(e) = st.saving.get(uri) {
            return Err(FileStatus::saving(uri, e.path.clone(), e.progress));
        }
        if let Some(e) = st.deleting.get(uri) {
            return Err(FileStatus::deleting(uri, e.path.clone(), e.progress));
        }
        st.deleting.insert(
            uri.to_string(),
            Entry {
                path: path.to_vec(),
                progress: 0,
            },
        );
        Ok(bump_client(&mut st.client_reqs, client_id))
    }

    pub fn update_saving_progress(&self, uri: &str, bytes: u64) {
        if let Some(e) = self.inner.lock().saving.get_mut(uri) {
            e.progress = bytes;
        }
    }

    pub fn update_deleting_progress(&self, uri: &str, bytes: u64) {
        if let Some(e) = self.inner.lock().deleting.get_mut(uri) {
            e.progress = bytes;
        }
    }

    pub fn end_saving(&self, uri: &str, client_id: Option<&str>) {
        let mut st = self.inner.lock();
        st.saving.remove(uri);
        drop_client(&mut st.client_reqs, client_id);
    }

    pub fn end_deleting(&self, uri: &str, client_id: Option<&str>) {
        let mut st = self.inner.lock();
        st.deleting.remove(uri);
        drop_client(&mut st.client_reqs, client_id);
    }

    /// Used by the read path, which holds a client slot without a
    /// `saving`/`deleting` entry.
    pub fn incr_client(&self, client_id: Option<&str>) -> u64 {
        let mut st = self.inner.lock();
        bump_client(&mut st.client_reqs, client_id)
    }

    pub fn decr_client(&self, client_id: Option<&str>) {
        let mut st = self.inner.lock();
        drop_client(&mut st.client_reqs, client_id);
    }

    pub fn client_reqs(&self, client_id: Option<&str>) -> u64 {
        let st = self.inner.lock();
        client_id
            .and_then(|id| st.client_reqs.get(id).copied())
            .unwrap_or(0)
    }

    pub fn all_statuses(&self) -> Vec<FileStatus> {
        let st = self.inner.lock();
        st.saving
            .iter()
            .map(|(uri, e)| FileStatus::saving(uri, e.path.clone(), e.progress))
            .chain(
                st.deleting
                    .iter()
                    .map(|(uri, e)| FileStatus::deleting(uri, e.path.clone(), e.progress)),
            )
            .collect()
    }
}

fn bump_client(map: &mut HashMap<String, u64>, client_id: Option<&str>) -> u64 {
    match client_id {
        None => 0,
        Some(id) => {
            let c = map.entry(id.to_string()).or_insert(0);
            *c += 1;
            *c
        }
    }
}

fn drop_client(map: &mut HashMap<String, u64>, client_id: Option<&str>) {
    let Some(id) = client_id else { return };
    if let Some(c) = map.get_mut(id) {
        if *c <= 1 {
            map.remove(id);
        } else {
            *c -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_save_short_circuits_with_current_status() {
        let reg = InFlightRegistry::new();
        reg.start_saving("u", &["a".into()], None).unwrap();
        let err = reg.start_saving("u", &["a".into()], None).unwrap_err();
        assert_eq!(err.status, crate::progress::OpStatus::Saving);
    }

    #[test]
    fn saving_and_deleting_are_mutually_exclusive() {
        let reg = InFlightRegistry::new();
        reg.start_saving("u", &["a".into()], None).unwrap();
        assert!(reg.start_deleting("u", &["a".into()], None).is_err());
    }

    #[test]
    fn client_reqs_tracks_concurrent_slots_and_clears_at_zero() {
        let reg = InFlightRegistry::new();
        assert_eq!(reg.client_reqs(Some("c")), 0);
        assert_eq!(reg.incr_client(Some("c")), 1);
        assert_eq!(reg.incr_client(Some("c")), 2);
        assert_eq!(reg.client_reqs(Some("c")), 2);
        reg.decr_client(Some("c"));
        assert_eq!(reg.client_reqs(Some("c")), 1);
        reg.decr_client(Some("c"));
        assert_eq!(reg.client_reqs(Some("c")), 0);
    }

    #[test]
    fn null_client_id_is_never_counted() {
        let reg = InFlightRegistry::new();
        assert_eq!(reg.incr_client(None), 0);
        assert_eq!(reg.client_reqs(None), 0);
    }

    #[test]
    fn idle_round_trip_clears_status() {
        let reg = InFlightRegistry::new();
        reg.start_saving("u", &["a".into()], Some("c")).unwrap();
        assert!(reg.status("u").is_some());
        reg.end_saving("u", Some("c"));
        assert!(reg.status("u").is_none());
        assert_eq!(reg.client_reqs(Some("c")), 0);
    }
}
