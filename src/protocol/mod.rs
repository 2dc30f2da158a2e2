//! STOMP wire protocol: frame model, codec, and heart-beat negotiation.

pub mod codec;
pub mod frame;
pub mod heartbeat;

pub use codec::{encode, write_frame, FrameError, FrameEvent, FrameLimits, FrameReader};
pub use frame::{Command, Frame, Headers};
