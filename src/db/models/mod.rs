pub mod event_models;

pub use event_models::{Event, EventRow, NewEvent};
