pub mod bootstrap;
pub mod day_session;
pub mod planner;
pub mod remote_sync;
pub mod save_scheduler;
