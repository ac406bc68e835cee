mod delta_log;
mod job_queue;
mod presence_bus;

pub use delta_log::InMemoryDeltaLog;
pub use job_queue::InMemoryJobQueue;
pub use presence_bus::InMemoryPresenceBus;
