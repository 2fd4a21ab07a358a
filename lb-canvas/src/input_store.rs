use std::{
    collections::HashMap,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::image_buffer::TextEncodedImage;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub image: Option<TextEncodedImage>,
    pub mask: Option<TextEncodedImage>,
    #[serde(default)]
    pub fit_on_add: bool,
}

#[derive(Default)]
pub struct NodeInputStore {
    entries: Mutex<HashMap<String, InputSnapshot>>,
}

impl NodeInputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, node_id: &str, snapshot: InputSnapshot) {
        let mut entries = self.entries.lock().expect("input store lock poisoned");
        entries.insert(node_id.to_string(), snapshot);
    }

    pub fn get(&self, node_id: &str) -> Option<InputSnapshot> {
        let entries = self.entries.lock().expect("input store lock poisoned");
        entries.get(node_id).cloned()
    }

    pub fn clear(&self, node_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("input store lock poisoned");
        entries.remove(node_id).is_some()
    }
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> TextEncodedImage {
        TextEncodedImage::from_string(value.to_string())
    }

    #[test]
    fn put_replaces_snapshot_wholesale() {
        let store = NodeInputStore::new();
        store.put(
            "7",
            InputSnapshot {
                image: Some(text("data:image/png;base64,AAAA")),
                mask: Some(text("data:image/png;base64,BBBB")),
                fit_on_add: true,
            },
        );
        store.put(
            "7",
            InputSnapshot {
                image: Some(text("data:image/png;base64,CCCC")),
                mask: None,
                fit_on_add: false,
            },
        );

        let snapshot = store.get("7").expect("snapshot should exist");
        assert_eq!(snapshot.image, Some(text("data:image/png;base64,CCCC")));
        assert_eq!(snapshot.mask, None);
        assert!(!snapshot.fit_on_add);
    }

    #[test]
    fn get_unknown_node_is_absent() {
        let store = NodeInputStore::new();
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn clear_is_idempotent() {
        let store = NodeInputStore::new();
        store.put("3", InputSnapshot::default());
        assert!(store.clear("3"));
        assert!(!store.clear("3"));
        assert_eq!(store.get("3"), None);
    }
}
