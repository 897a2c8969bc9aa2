pub mod frame;

pub use frame::{is_valid_command, Frame, FrameCodec, FrameError};
