pub mod assembler;
pub mod audit_log;
pub mod checkpoint;
pub mod delta_log;
pub mod presence;
pub mod snapshot;
