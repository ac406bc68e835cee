pub mod access_repository;
pub mod author_repository;
pub mod delta_log_port;
pub mod document_engine;
pub mod document_repository;
pub mod event_log_port;
pub mod job_queue_port;
pub mod object_store_port;
pub mod presence_port;
pub mod realtime_port;
pub mod realtime_types;
pub mod user_repository;
