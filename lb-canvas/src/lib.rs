mod compute;
mod execution_cache;
mod flow_tracker;
mod image_buffer;
mod input_store;
mod push_channel;
mod single_flight;

pub use compute::{CanvasRuntime, ComputeOutcome};
pub use execution_cache::{ExecutionCache, ExecutionId};
pub use flow_tracker::{DEFAULT_FLOW_CAPACITY, FlowRecord, FlowStatus, FlowTracker};
pub use image_buffer::{CodecError, ColorMode, ImageBuffer, PLACEHOLDER_EDGE, TextEncodedImage};
pub use input_store::{InputSnapshot, NodeInputStore};
pub use push_channel::{DEFAULT_EDIT_TTL_MS, EditSnapshot, PushChannelStore, node_id_is_valid};
pub use single_flight::{FlightPermit, SingleFlightGuard};
