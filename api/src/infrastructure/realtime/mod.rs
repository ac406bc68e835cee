pub use crate::application::ports::realtime_types::{DynRealtimeSink, DynRealtimeStream};

pub mod keys;
pub mod memory;
pub mod redis;
pub mod worker;
