pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod messaging;
pub mod services;

#[cfg(test)]
mod test_support;

pub use error::Error;

// Re-export main components for easier use
pub use services::{
    ChatRelay,
    EventGateway,
    Frame,
    FrameBuffer,
    StreamPublisher,
};
