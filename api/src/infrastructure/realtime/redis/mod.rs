mod delta_log;
mod job_stream;
mod presence_bus;

pub use delta_log::RedisDeltaLog;
pub use job_stream::{JobStreamOptions, RedisJobQueue};
pub use presence_bus::RedisPresenceBus;
