use std::{collections::HashMap, sync::Mutex};

use tracing::debug;

use crate::{image_buffer::TextEncodedImage, input_store::now_unix_ms};

pub const DEFAULT_EDIT_TTL_MS: u64 = 5 * 60 * 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditSnapshot {
    pub image: Option<TextEncodedImage>,
    pub mask: Option<TextEncodedImage>,
    pub received_unix_ms: u64,
}

pub struct PushChannelStore {
    entries: Mutex<HashMap<String, EditSnapshot>>,
    ttl_ms: u64,
}

impl PushChannelStore {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_ms,
        }
    }

    pub fn receive(
        &self,
        node_id: &str,
        image: Option<TextEncodedImage>,
        mask: Option<TextEncodedImage>,
    ) {
        self.receive_stamped(node_id, image, mask, now_unix_ms());
    }

    pub fn take_and_clear(&self, node_id: &str) -> Option<EditSnapshot> {
        self.take_and_clear_at(node_id, now_unix_ms())
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(now_unix_ms())
    }

    // Eviction is best-effort cleanup: readers must treat an absent entry as
    // "no new edit", whether it expired here or was never pushed.
    pub fn sweep_at(&self, now_unix_ms: u64) -> usize {
        let mut entries = self.entries.lock().expect("push channel lock poisoned");
        let before = entries.len();
        entries.retain(|node_id, snapshot| {
            if !node_id_is_valid(node_id) {
                debug!("evicting push channel entry with invalid node id {node_id}");
                return false;
            }
            if expired(snapshot.received_unix_ms, now_unix_ms, self.ttl_ms) {
                debug!("evicting stale push channel entry for node {node_id}");
                return false;
            }
            true
        });
        before - entries.len()
    }

    pub(crate) fn receive_stamped(
        &self,
        node_id: &str,
        image: Option<TextEncodedImage>,
        mask: Option<TextEncodedImage>,
        received_unix_ms: u64,
    ) {
        let mut entries = self.entries.lock().expect("push channel lock poisoned");
        entries.insert(
            node_id.to_string(),
            EditSnapshot {
                image,
                mask,
                received_unix_ms,
            },
        );
    }

    pub(crate) fn take_and_clear_at(&self, node_id: &str, now_unix_ms: u64) -> Option<EditSnapshot> {
        let mut entries = self.entries.lock().expect("push channel lock poisoned");
        let snapshot = entries.remove(node_id)?;
        if expired(snapshot.received_unix_ms, now_unix_ms, self.ttl_ms) {
            debug!("discarding stale push channel entry for node {node_id}");
            return None;
        }
        Some(snapshot)
    }
}

impl Default for PushChannelStore {
    fn default() -> Self {
        Self::new(DEFAULT_EDIT_TTL_MS)
    }
}

pub fn node_id_is_valid(node_id: &str) -> bool {
    if node_id.trim().is_empty() {
        return false;
    }
    match node_id.parse::<i64>() {
        Ok(numeric) => numeric >= 0,
        Err(_) => true,
    }
}

fn expired(received_unix_ms: u64, now_unix_ms: u64, ttl_ms: u64) -> bool {
    now_unix_ms.saturating_sub(received_unix_ms) > ttl_ms
}
