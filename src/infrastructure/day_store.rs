use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait LocalDayStore: Send + Sync {
    fn get(&self, day: &str) -> Result<Option<Value>, InfraError>;
    fn set(&self, day: &str, payload: &Value, updated_at: DateTime<Utc>) -> Result<(), InfraError>;
    fn remove(&self, day: &str) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteDayStore {
    db_path: PathBuf,
}

impl SqliteDayStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl LocalDayStore for SqliteDayStore {
    fn get(&self, day: &str) -> Result<Option<Value>, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT payload FROM day_records WHERE day = ?1",
                params![day],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(InfraError::from))
            .transpose()
    }

    fn set(&self, day: &str, payload: &Value, updated_at: DateTime<Utc>) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO day_records (day, payload, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(day) DO UPDATE SET
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            params![day, serde_json::to_string(payload)?, updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, day: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute("DELETE FROM day_records WHERE day = ?1", params![day])?;
        Ok(removed > 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDayStore {
    records: Mutex<BTreeMap<String, Value>>,
}

impl InMemoryDayStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>, InfraError> {
        self.records
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("day store lock poisoned: {error}")))
    }
}

impl LocalDayStore for InMemoryDayStore {
    fn get(&self, day: &str) -> Result<Option<Value>, InfraError> {
        Ok(self.lock()?.get(day).cloned())
    }

    fn set(&self, day: &str, payload: &Value, _updated_at: DateTime<Utc>) -> Result<(), InfraError> {
        self.lock()?.insert(day.to_string(), payload.clone());
        Ok(())
    }

    fn remove(&self, day: &str) -> Result<bool, InfraError> {
        Ok(self.lock()?.remove(day).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use serde_json::json;
    use std::fs;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn exercise(store: &dyn LocalDayStore) {
        assert_eq!(store.get("2026-02-16").expect("get"), None);

        let payload = json!({"slots": {"9": {"planned": "Deep Work"}}});
        store.set("2026-02-16", &payload, fixed_time()).expect("set");
        assert_eq!(store.get("2026-02-16").expect("get"), Some(payload));

        let replaced = json!({"slots": {}});
        store.set("2026-02-16", &replaced, fixed_time()).expect("set");
        assert_eq!(store.get("2026-02-16").expect("get"), Some(replaced));

        assert!(store.remove("2026-02-16").expect("remove"));
        assert!(!store.remove("2026-02-16").expect("remove"));
    }

    #[test]
    fn in_memory_store_round_trips() {
        exercise(&InMemoryDayStore::default());
    }

    #[test]
    fn sqlite_store_round_trips() {
        let dir = std::env::temp_dir().join(format!("dayplan-day-store-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("planner.sqlite");
        initialize_database(&path).expect("initialize database");

        exercise(&SqliteDayStore::new(&path));
        let _ = fs::remove_dir_all(&dir);
    }
}
