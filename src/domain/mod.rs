pub mod balancer;
pub mod day_record;
pub mod decomposer;
pub mod duration_text;
pub mod merge_registry;
pub mod models;
pub mod routine;
pub mod slot_grid;
pub mod timer;
