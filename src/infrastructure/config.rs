use crate::domain::slot_grid::DayStartHour;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use url::Url;

const APP_JSON: &str = "app.json";
const SYNC_JSON: &str = "sync.json";

const REMOTE_URL_KEYS: &[&str] = &["DAYPLAN_REMOTE_URL"];
const REMOTE_API_KEY_KEYS: &[&str] = &["DAYPLAN_REMOTE_API_KEY"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub timezone: Tz,
    pub day_start: DayStartHour,
    pub plan_step_seconds: u64,
    pub reconcile_interval_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebounceConfig {
    pub local_ms: u64,
    pub remote_day_ms: u64,
    pub remote_catalog_ms: u64,
    pub remote_routines_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            local_ms: 300,
            remote_day_ms: 1500,
            remote_catalog_ms: 2000,
            remote_routines_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    pub app: AppConfig,
    pub debounce: DebounceConfig,
    pub retry: RetryConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            app: AppConfig {
                timezone: Tz::UTC,
                day_start: DayStartHour::Midnight,
                plan_step_seconds: 600,
                reconcile_interval_seconds: 5,
            },
            debounce: DebounceConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: Url,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppFile {
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default)]
    day_start_hour: u8,
    #[serde(default = "default_plan_step")]
    plan_step_seconds: u64,
    #[serde(default = "default_reconcile_interval")]
    reconcile_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Default)]
struct SyncFile {
    #[serde(default)]
    debounce: DebounceConfig,
    #[serde(default)]
    retry: RetryConfig,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_plan_step() -> u64 {
    600
}

fn default_reconcile_interval() -> u64 {
    5
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": "UTC",
                "dayStartHour": 0,
                "planStepSeconds": 600,
                "reconcileIntervalSeconds": 5
            }),
        ),
        (
            SYNC_JSON,
            serde_json::json!({
                "schema": 1,
                "debounce": {
                    "localMs": 300,
                    "remoteDayMs": 1500,
                    "remoteCatalogMs": 2000,
                    "remoteRoutinesMs": 2000
                },
                "retry": {
                    "maxAttempts": 5,
                    "baseDelayMs": 1000,
                    "maxDelayMs": 60000
                }
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_planner_config(config_dir: &Path) -> Result<PlannerConfig, InfraError> {
    let app: AppFile = serde_json::from_value(read_config(&config_dir.join(APP_JSON))?)?;
    let sync: SyncFile = serde_json::from_value(read_config(&config_dir.join(SYNC_JSON))?)?;

    let timezone = app.timezone.trim().parse::<Tz>().map_err(|_| {
        InfraError::InvalidConfig(format!("unknown timezone '{}'", app.timezone.trim()))
    })?;
    let day_start = DayStartHour::try_from(app.day_start_hour).map_err(InfraError::InvalidConfig)?;
    if app.plan_step_seconds == 0 || app.plan_step_seconds % 60 != 0 {
        return Err(InfraError::InvalidConfig(
            "planStepSeconds must be a positive whole number of minutes".to_string(),
        ));
    }
    if app.reconcile_interval_seconds == 0 {
        return Err(InfraError::InvalidConfig(
            "reconcileIntervalSeconds must be positive".to_string(),
        ));
    }
    if sync.retry.max_attempts == 0 {
        return Err(InfraError::InvalidConfig(
            "retry.maxAttempts must be positive".to_string(),
        ));
    }
    if sync.retry.max_delay_ms < sync.retry.base_delay_ms {
        return Err(InfraError::InvalidConfig(
            "retry.maxDelayMs must be >= retry.baseDelayMs".to_string(),
        ));
    }

    Ok(PlannerConfig {
        app: AppConfig {
            timezone,
            day_start,
            plan_step_seconds: app.plan_step_seconds,
            reconcile_interval_seconds: app.reconcile_interval_seconds,
        },
        debounce: sync.debounce,
        retry: sync.retry,
    })
}

pub fn load_remote_config_from_env() -> Result<Option<RemoteConfig>, InfraError> {
    load_remote_config_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_remote_config_from_lookup<F>(lookup: F) -> Result<Option<RemoteConfig>, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw_url) = optional_lookup_value(&lookup, REMOTE_URL_KEYS) else {
        return Ok(None);
    };
    let base_url = Url::parse(&raw_url)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid remote url: {error}")))?;
    let api_key = required_lookup_value(&lookup, REMOTE_API_KEY_KEYS, "remote api key")?;
    Ok(Some(RemoteConfig { base_url, api_key }))
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
