use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    execution_cache::{ExecutionCache, ExecutionId},
    flow_tracker::{FlowStatus, FlowTracker},
    image_buffer::{CodecError, ImageBuffer, TextEncodedImage},
    input_store::{InputSnapshot, NodeInputStore},
    push_channel::PushChannelStore,
    single_flight::SingleFlightGuard,
};

#[derive(Clone)]
pub struct CanvasRuntime {
    pub inputs: Arc<NodeInputStore>,
    pub edits: Arc<PushChannelStore>,
    pub cache: Arc<ExecutionCache>,
    pub flows: Arc<FlowTracker>,
    guard: Arc<SingleFlightGuard>,
}

#[derive(Clone, Debug)]
pub struct ComputeOutcome {
    pub flow_id: Uuid,
    pub image: ImageBuffer,
    pub mask: ImageBuffer,
    pub served_from_cache: bool,
}

impl CanvasRuntime {
    pub fn new(edit_ttl_ms: u64, flow_capacity: usize) -> Self {
        Self {
            inputs: Arc::new(NodeInputStore::new()),
            edits: Arc::new(PushChannelStore::new(edit_ttl_ms)),
            cache: Arc::new(ExecutionCache::new()),
            flows: Arc::new(FlowTracker::new(flow_capacity)),
            guard: Arc::new(SingleFlightGuard::new()),
        }
    }

    pub fn single_flight(&self) -> &SingleFlightGuard {
        &self.guard
    }

    // The computation step. Never returns an absent output: the fallback
    // chain is decoded edit, then restored cache, then the 512x512 blank.
    pub fn process(
        &self,
        node_id: &str,
        input: InputSnapshot,
        execution_id: Option<ExecutionId>,
    ) -> ComputeOutcome {
        let flow_id = Uuid::new_v4();

        let Some(_permit) = self.guard.try_enter() else {
            warn!("computation already in flight, serving cached result for node {node_id}");
            self.flows.record(
                flow_id,
                "skipped",
                FlowStatus::Skipped,
                Some(format!("node {node_id} busy")),
            );
            let (image, mask) = self.cache.read(node_id);
            return ComputeOutcome {
                flow_id,
                image: image.unwrap_or_else(ImageBuffer::placeholder_image),
                mask: mask.unwrap_or_else(ImageBuffer::placeholder_mask),
                served_from_cache: true,
            };
        };

        info!("starting computation for node {node_id} flow {flow_id}");
        self.inputs.put(node_id, input);
        self.flows.record(flow_id, "input_stored", FlowStatus::Ok, None);

        let execution_id = execution_id.unwrap_or_else(ExecutionId::wall_clock);
        self.cache.restore_if_same_execution(node_id, execution_id);

        let mut degraded = false;
        let (edit_image, edit_mask) = match self.edits.take_and_clear(node_id) {
            Some(edit) => {
                debug!("consumed push channel edit for node {node_id}");
                (
                    decode_or_degrade(
                        edit.image.as_ref(),
                        node_id,
                        "image",
                        &mut degraded,
                        TextEncodedImage::decode_rgb,
                    ),
                    decode_or_degrade(
                        edit.mask.as_ref(),
                        node_id,
                        "mask",
                        &mut degraded,
                        TextEncodedImage::decode_gray,
                    ),
                )
            }
            None => {
                debug!("no push channel edit for node {node_id}");
                (None, None)
            }
        };

        let (cached_image, cached_mask) = self.cache.read(node_id);
        let image = edit_image
            .or(cached_image)
            .unwrap_or_else(ImageBuffer::placeholder_image);
        let mask = edit_mask
            .or(cached_mask)
            .unwrap_or_else(ImageBuffer::placeholder_mask);

        self.cache.commit(node_id, image.clone(), mask.clone());
        let status = if degraded {
            FlowStatus::Degraded
        } else {
            FlowStatus::Ok
        };
        self.flows.record(
            flow_id,
            "completed",
            status,
            Some(format!("{}x{}", image.width(), image.height())),
        );

        ComputeOutcome {
            flow_id,
            image,
            mask,
            served_from_cache: false,
        }
    }
}

fn decode_or_degrade<F>(
    text: Option<&TextEncodedImage>,
    node_id: &str,
    kind: &str,
    degraded: &mut bool,
    decode: F,
) -> Option<ImageBuffer>
where
    F: Fn(&TextEncodedImage) -> Result<ImageBuffer, CodecError>,
{
    let text = text?;
    match decode(text) {
        Ok(buffer) => Some(buffer),
        Err(err) => {
            warn!("failed to decode edit {kind} for node {node_id}: {err}");
            *degraded = true;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ColorMode;

    fn runtime() -> CanvasRuntime {
        CanvasRuntime::new(crate::DEFAULT_EDIT_TTL_MS, 64)
    }

    fn solid_rgb(width: u32, height: u32, value: u8) -> ImageBuffer {
        ImageBuffer::from_raw(
            width,
            height,
            ColorMode::Rgb,
            vec![value; width as usize * height as usize * 3],
        )
        .expect("valid geometry")
    }

    #[test]
    fn empty_store_and_cache_yield_placeholder_outputs() {
        let runtime = runtime();
        let outcome = runtime.process("n1", InputSnapshot::default(), Some(ExecutionId::new(1)));

        assert!(!outcome.served_from_cache);
        assert_eq!(outcome.image.width(), 512);
        assert_eq!(outcome.mask.width(), 512);
        assert_eq!(outcome.mask.mode(), ColorMode::Gray);
    }

    #[test]
    fn pushed_edit_is_consumed_and_committed() {
        let runtime = runtime();
        let edit = solid_rgb(4, 4, 200);
        let encoded = edit.to_data_uri().expect("encode should succeed");
        runtime.edits.receive("n1", Some(encoded), None);

        let outcome = runtime.process("n1", InputSnapshot::default(), Some(ExecutionId::new(1)));
        assert_eq!(outcome.image, edit);
        // Pop-once: the edit is gone, but the committed result carries over
        // within the same execution.
        let second = runtime.process("n1", InputSnapshot::default(), Some(ExecutionId::new(1)));
        assert_eq!(second.image, edit);
        assert_eq!(runtime.cache.read("n1").0, Some(edit));
    }

    #[test]
    fn new_execution_discards_carried_result() {
        let runtime = runtime();
        let edit = solid_rgb(4, 4, 99);
        runtime
            .edits
            .receive("n1", Some(edit.to_data_uri().expect("encode")), None);
        runtime.process("n1", InputSnapshot::default(), Some(ExecutionId::new(1)));

        let outcome = runtime.process("n1", InputSnapshot::default(), Some(ExecutionId::new(2)));
        assert_eq!(outcome.image.width(), 512);
        assert_ne!(outcome.image, edit);
    }

    #[test]
    fn busy_guard_serves_cached_result_without_consuming_edit() {
        let runtime = runtime();
        let committed = solid_rgb(4, 4, 50);
        runtime
            .edits
            .receive("n1", Some(committed.to_data_uri().expect("encode")), None);
        runtime.process("n1", InputSnapshot::default(), Some(ExecutionId::new(1)));

        runtime
            .edits
            .receive("n1", Some(solid_rgb(4, 4, 60).to_data_uri().expect("encode")), None);

        let _held = runtime
            .single_flight()
            .try_enter()
            .expect("guard should be free");
        let outcome = runtime.process("n1", InputSnapshot::default(), Some(ExecutionId::new(1)));

        assert!(outcome.served_from_cache);
        assert_eq!(outcome.image, committed);
        // The skipped call must not have popped the pending edit.
        assert!(runtime.edits.take_and_clear("n1").is_some());
    }

    #[test]
    fn busy_guard_with_empty_cache_still_yields_placeholders() {
        let runtime = runtime();
        let _held = runtime
            .single_flight()
            .try_enter()
            .expect("guard should be free");
        let outcome = runtime.process("n1", InputSnapshot::default(), None);

        assert!(outcome.served_from_cache);
        assert_eq!(outcome.image.width(), 512);
        assert_eq!(outcome.mask.width(), 512);
    }

    #[test]
    fn undecodable_edit_degrades_to_placeholder() {
        let runtime = runtime();
        runtime.edits.receive(
            "n1",
            Some(TextEncodedImage::from_string(
                "data:image/png;base64,@@corrupt@@".to_string(),
            )),
            None,
        );

        let outcome = runtime.process("n1", InputSnapshot::default(), Some(ExecutionId::new(1)));
        assert!(!outcome.served_from_cache);
        assert_eq!(outcome.image.width(), 512);

        let record = runtime
            .flows
            .query(outcome.flow_id)
            .expect("flow record should exist");
        assert_eq!(record.status, FlowStatus::Degraded);
    }

    #[test]
    fn input_snapshot_is_stored_before_computation() {
        let runtime = runtime();
        let input = InputSnapshot {
            image: None,
            mask: None,
            fit_on_add: true,
        };
        runtime.process("n1", input.clone(), Some(ExecutionId::new(1)));
        assert_eq!(runtime.inputs.get("n1"), Some(input));
    }

    #[test]
    fn skipped_flow_is_recorded() {
        let runtime = runtime();
        let _held = runtime
            .single_flight()
            .try_enter()
            .expect("guard should be free");
        let outcome = runtime.process("n1", InputSnapshot::default(), None);

        let record = runtime
            .flows
            .query(outcome.flow_id)
            .expect("flow record should exist");
        assert_eq!(record.stage, "skipped");
        assert_eq!(record.status, FlowStatus::Skipped);
    }
}
