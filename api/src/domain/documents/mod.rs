pub mod cursor;
pub mod delta;
pub mod snapshot;
