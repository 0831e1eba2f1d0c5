pub mod config;
pub mod day_store;
pub mod error;
pub mod logging;
pub mod record_mapper;
pub mod remote_client;
pub mod storage;
