use std::{num::NonZeroUsize, sync::Mutex};

use lru::LruCache;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::input_store::now_unix_ms;

pub const DEFAULT_FLOW_CAPACITY: usize = 1_024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Ok,
    Skipped,
    Degraded,
}

#[derive(Clone, Debug, Serialize)]
pub struct FlowRecord {
    pub flow_id: Uuid,
    pub unix_ms: u64,
    pub stage: &'static str,
    pub status: FlowStatus,
    pub info: Option<String>,
}

// Last-observed-stage table, not a history: record overwrites per flow id.
pub struct FlowTracker {
    records: Mutex<LruCache<Uuid, FlowRecord>>,
}

impl FlowTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is clamped above zero");
        Self {
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn record(&self, flow_id: Uuid, stage: &'static str, status: FlowStatus, info: Option<String>) {
        debug!("flow {flow_id} stage={stage} status={status:?}");
        let record = FlowRecord {
            flow_id,
            unix_ms: now_unix_ms(),
            stage,
            status,
            info,
        };
        let mut records = self.records.lock().expect("flow tracker lock poisoned");
        records.put(flow_id, record);
    }

    pub fn query(&self, flow_id: Uuid) -> Option<FlowRecord> {
        let mut records = self.records.lock().expect("flow tracker lock poisoned");
        records.get(&flow_id).cloned()
    }

    pub fn query_all(&self) -> Vec<FlowRecord> {
        let records = self.records.lock().expect("flow tracker lock poisoned");
        records.iter().map(|(_, record)| record.clone()).collect()
    }
}

impl Default for FlowTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FLOW_CAPACITY)
    }
}
