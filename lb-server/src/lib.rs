mod channel;
mod logging;
mod matting;
mod outputs;
mod server;
mod sweeper;

pub use channel::handle_channel_text;
pub use logging::init as init_logging;
pub use matting::{MattingEngine, MattingError, ThresholdMatting};
pub use server::{AppState, CanvasConfig, build_canvas_app};
pub use sweeper::spawn_sweep_task;
