pub mod db;
pub mod engine;
pub mod realtime;
pub mod storage;
