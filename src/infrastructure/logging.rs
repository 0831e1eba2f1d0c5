use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_FILE_NAME: &str = "planner.log";

pub fn init_tracing(logs_dir: &Path, level: &str) -> Result<(), InfraError> {
    static INIT: OnceLock<()> = OnceLock::new();
    if INIT.get().is_some() {
        return Ok(());
    }

    fs::create_dir_all(logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE_NAME))?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_file_and_is_repeatable() {
        let dir = std::env::temp_dir().join(format!("dayplan-logging-{}", std::process::id()));
        init_tracing(&dir, "debug").expect("first init");
        init_tracing(&dir, "debug").expect("second init");
        assert!(dir.join(LOG_FILE_NAME).exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
