pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{BootstrapResult, bootstrap_workspace};
pub use application::day_session::{DaySession, RowRenderModel};
pub use application::planner::{Planner, spawn_reconciler};
pub use application::save_scheduler::{SaveClass, SaveStatus};
pub use infrastructure::error::InfraError;

use chrono::NaiveDate;
use infrastructure::config::load_remote_config_from_env;
use infrastructure::day_store::SqliteDayStore;
use infrastructure::logging::init_tracing;
use infrastructure::remote_client::ReqwestRemoteDayClient;
use std::path::Path;

pub fn open_planner(
    root: &Path,
    today: NaiveDate,
) -> Result<Planner<SqliteDayStore, ReqwestRemoteDayClient>, InfraError> {
    let bootstrap = bootstrap_workspace(root)?;
    init_tracing(&bootstrap.logs_dir, "info")?;
    let remote = load_remote_config_from_env()?;
    tracing::info!(
        command = "open_planner",
        workspace_root = %bootstrap.workspace_root.display(),
        remote = remote.is_some(),
    );
    Planner::open(&bootstrap, remote.as_ref(), today)
}
