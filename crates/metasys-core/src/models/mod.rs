//! Shared data models for stream ingestion

mod event;
mod frame;
mod observation;
mod token;

pub use event::*;
pub use frame::*;
pub use observation::*;
pub use token::*;
