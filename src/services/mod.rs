pub mod chat;
pub mod frame_buffer;
pub mod gateway;
pub mod streaming;

pub use chat::{ChatProvider, ChatRelay, GeminiClient};
pub use frame_buffer::{Frame, FrameBuffer};
pub use gateway::{EventGateway, EventPayload, FramePayload};
pub use streaming::StreamPublisher;
