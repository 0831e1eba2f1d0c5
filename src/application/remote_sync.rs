use crate::application::save_scheduler::backoff_delay;
use crate::domain::day_record::{
    ACTIVITY_CATALOG_DAY, DayRecord, ROUTINE_CATALOG_DAY, decode_activity_catalog, decode_day,
    decode_routine_catalog, encode_activity_catalog, encode_day, encode_routine_catalog,
};
use crate::domain::models::ActivityCatalog;
use crate::domain::routine::{RoutineCatalog, StopSweep};
use crate::infrastructure::config::RetryConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_client::{RemoteDayClient, RemoteIdentity};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::sleep;

// Retry budget for remote reads. Writes are attempted once per scheduled
// save; the save scheduler owns their backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Unchanged,
    Upserted,
    Deleted,
}

impl PushOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Upserted => "upserted",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub days_scanned: usize,
    pub days_updated: usize,
    pub slots_cleared: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeUpdate {
    Day(DayRecord),
    Routines(RoutineCatalog),
    Activities(ActivityCatalog),
}

pub fn routine_catalog_signature(catalog: &RoutineCatalog) -> String {
    serde_json::to_string(catalog).unwrap_or_default()
}

pub fn activity_catalog_signature(catalog: &ActivityCatalog) -> String {
    serde_json::to_string(catalog).unwrap_or_default()
}

fn decode_update(day: &str, payload: &Value) -> Result<(RealtimeUpdate, String), InfraError> {
    Ok(match day {
        ROUTINE_CATALOG_DAY => {
            let catalog = decode_routine_catalog(payload)?;
            let signature = routine_catalog_signature(&catalog);
            (RealtimeUpdate::Routines(catalog), signature)
        }
        ACTIVITY_CATALOG_DAY => {
            let catalog = decode_activity_catalog(payload)?;
            let signature = activity_catalog_signature(&catalog);
            (RealtimeUpdate::Activities(catalog), signature)
        }
        _ => {
            let record = decode_day(payload)?;
            let signature = record.signature();
            (RealtimeUpdate::Day(record), signature)
        }
    })
}

pub struct RemoteSyncService<C>
where
    C: RemoteDayClient,
{
    client: Arc<C>,
    retry_policy: RetryPolicy,
    signatures: Mutex<HashMap<(String, String), String>>,
}

impl<C> RemoteSyncService<C>
where
    C: RemoteDayClient,
{
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            retry_policy: RetryPolicy::default(),
            signatures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn lock_signatures(&self) -> Result<MutexGuard<'_, HashMap<(String, String), String>>, InfraError> {
        self.signatures
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("signature cache lock poisoned: {error}")))
    }

    pub fn last_signature(&self, identity: &RemoteIdentity, day: &str) -> Option<String> {
        self.lock_signatures()
            .ok()?
            .get(&(identity.user_id.clone(), day.to_string()))
            .cloned()
    }

    fn remember(&self, identity: &RemoteIdentity, day: &str, signature: String) -> Result<(), InfraError> {
        self.lock_signatures()?
            .insert((identity.user_id.clone(), day.to_string()), signature);
        Ok(())
    }

    pub fn clear_signatures(&self) -> Result<(), InfraError> {
        self.lock_signatures()?.clear();
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                    attempt = attempt.saturating_add(1);
                    let delay = backoff_delay(
                        u32::from(attempt),
                        self.retry_policy.base_delay_ms,
                        self.retry_policy.max_delay_ms,
                    );
                    tracing::warn!(operation, attempt, error = %error, "retrying remote call");
                    sleep(delay.to_std().unwrap_or_default()).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn push_payload(
        &self,
        identity: &RemoteIdentity,
        day: &str,
        payload: &Value,
        signature: String,
        delete_when_empty: bool,
    ) -> Result<PushOutcome, InfraError> {
        if self.last_signature(identity, day).as_deref() == Some(signature.as_str()) {
            return Ok(PushOutcome::Unchanged);
        }
        let outcome = if delete_when_empty {
            self.client.delete_day(identity, day).await?;
            PushOutcome::Deleted
        } else {
            self.client.upsert_day(identity, day, payload).await?;
            PushOutcome::Upserted
        };
        self.remember(identity, day, signature)?;
        tracing::info!(command = "push_day", day, outcome = outcome.as_str());
        Ok(outcome)
    }

    pub async fn push_day(
        &self,
        identity: &RemoteIdentity,
        day: &str,
        record: &DayRecord,
    ) -> Result<PushOutcome, InfraError> {
        let payload = encode_day(record)?;
        self.push_payload(identity, day, &payload, record.signature(), record.is_empty())
            .await
    }

    pub async fn push_routine_catalog(
        &self,
        identity: &RemoteIdentity,
        catalog: &RoutineCatalog,
    ) -> Result<PushOutcome, InfraError> {
        let payload = encode_routine_catalog(catalog)?;
        self.push_payload(
            identity,
            ROUTINE_CATALOG_DAY,
            &payload,
            routine_catalog_signature(catalog),
            false,
        )
        .await
    }

    pub async fn push_activity_catalog(
        &self,
        identity: &RemoteIdentity,
        catalog: &ActivityCatalog,
    ) -> Result<PushOutcome, InfraError> {
        let payload = encode_activity_catalog(catalog)?;
        self.push_payload(
            identity,
            ACTIVITY_CATALOG_DAY,
            &payload,
            activity_catalog_signature(catalog),
            false,
        )
        .await
    }

    async fn fetch_payload(&self, identity: &RemoteIdentity, day: &str) -> Result<Option<Value>, InfraError> {
        let row = self
            .with_retry("fetch_day", || self.client.fetch_day(identity, day))
            .await?;
        Ok(row.map(|row| row.payload))
    }

    pub async fn fetch_day(&self, identity: &RemoteIdentity, day: &str) -> Result<Option<DayRecord>, InfraError> {
        let Some(payload) = self.fetch_payload(identity, day).await? else {
            return Ok(None);
        };
        let record = decode_day(&payload)?;
        self.remember(identity, day, record.signature())?;
        Ok(Some(record))
    }

    pub async fn fetch_routine_catalog(
        &self,
        identity: &RemoteIdentity,
    ) -> Result<Option<RoutineCatalog>, InfraError> {
        let Some(payload) = self.fetch_payload(identity, ROUTINE_CATALOG_DAY).await? else {
            return Ok(None);
        };
        let catalog = decode_routine_catalog(&payload)?;
        self.remember(identity, ROUTINE_CATALOG_DAY, routine_catalog_signature(&catalog))?;
        Ok(Some(catalog))
    }

    pub async fn fetch_activity_catalog(
        &self,
        identity: &RemoteIdentity,
    ) -> Result<Option<ActivityCatalog>, InfraError> {
        let Some(payload) = self.fetch_payload(identity, ACTIVITY_CATALOG_DAY).await? else {
            return Ok(None);
        };
        let catalog = decode_activity_catalog(&payload)?;
        self.remember(identity, ACTIVITY_CATALOG_DAY, activity_catalog_signature(&catalog))?;
        Ok(Some(catalog))
    }

    pub async fn sweep_stopped_routine(&self, identity: &RemoteIdentity, sweep: &StopSweep) -> SweepReport {
        let mut report = SweepReport::default();
        let after = sweep.after.to_string();
        let rows = match self
            .with_retry("list_days_after", || self.client.list_days_after(identity, &after))
            .await
        {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(command = "sweep_stopped_routine", error = %error, "listing later days failed");
                report.failures += 1;
                return report;
            }
        };

        for row in rows {
            report.days_scanned += 1;
            let mut record = match decode_day(&row.payload) {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!(day = row.day.as_str(), error = %error, "skipping undecodable day");
                    report.failures += 1;
                    continue;
                }
            };
            let cleared = record.remove_routine_fill(&sweep.label, &sweep.hours);
            if cleared == 0 {
                continue;
            }
            match self.push_day(identity, &row.day, &record).await {
                Ok(_) => {
                    report.days_updated += 1;
                    report.slots_cleared += cleared;
                }
                Err(error) => {
                    tracing::warn!(day = row.day.as_str(), error = %error, "sweep write failed");
                    report.failures += 1;
                }
            }
        }

        tracing::info!(
            command = "sweep_stopped_routine",
            routine_id = sweep.routine_id.as_str(),
            scanned = report.days_scanned,
            updated = report.days_updated,
            failures = report.failures,
        );
        report
    }

    pub async fn resolve_realtime_change(
        &self,
        identity: &RemoteIdentity,
        day: &str,
        current_signature: &str,
    ) -> Result<Option<RealtimeUpdate>, InfraError> {
        let payload = match self.fetch_payload(identity, day).await? {
            Some(payload) => payload,
            None if day == ROUTINE_CATALOG_DAY || day == ACTIVITY_CATALOG_DAY => return Ok(None),
            None => encode_day(&DayRecord::default())?,
        };
        let (update, signature) = decode_update(day, &payload)?;
        if signature == current_signature
            || self.last_signature(identity, day).as_deref() == Some(signature.as_str())
        {
            return Ok(None);
        }
        self.remember(identity, day, signature)?;
        Ok(Some(update))
    }
}

fn should_retry(error: &InfraError) -> bool {
    match error {
        InfraError::Remote(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("network error")
                || message.contains("timeout")
                || message.contains("timed out")
                || message.contains("with status 5")
                || message.contains("with status 429")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::day_record::{SlotRecord, is_sentinel_day};
    use crate::domain::models::{Routine, RoutinePattern};
    use crate::infrastructure::remote_client::RemoteDayRow;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use serde_json::json;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeRemoteClient {
        rows: Mutex<BTreeMap<String, Value>>,
        failures: Mutex<VecDeque<String>>,
        upsert_calls: AtomicUsize,
        delete_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl FakeRemoteClient {
        fn with_rows(rows: Vec<(&str, Value)>) -> Self {
            let client = Self::default();
            {
                let mut stored = client.rows.lock().expect("rows lock");
                for (day, payload) in rows {
                    stored.insert(day.to_string(), payload);
                }
            }
            client
        }

        fn fail_next(&self, message: &str) {
            self.failures
                .lock()
                .expect("failures lock")
                .push_back(message.to_string());
        }

        fn take_failure(&self) -> Result<(), InfraError> {
            match self.failures.lock().expect("failures lock").pop_front() {
                Some(message) => Err(InfraError::Remote(message)),
                None => Ok(()),
            }
        }

        fn row(&self, day: &str) -> Option<Value> {
            self.rows.lock().expect("rows lock").get(day).cloned()
        }
    }

    #[async_trait]
    impl RemoteDayClient for FakeRemoteClient {
        async fn upsert_day(
            &self,
            _identity: &RemoteIdentity,
            day: &str,
            payload: &Value,
        ) -> Result<(), InfraError> {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
            self.take_failure()?;
            self.rows
                .lock()
                .expect("rows lock")
                .insert(day.to_string(), payload.clone());
            Ok(())
        }

        async fn fetch_day(
            &self,
            _identity: &RemoteIdentity,
            day: &str,
        ) -> Result<Option<RemoteDayRow>, InfraError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.take_failure()?;
            Ok(self.row(day).map(|payload| RemoteDayRow {
                day: day.to_string(),
                payload,
                updated_at: None,
            }))
        }

        async fn delete_day(&self, _identity: &RemoteIdentity, day: &str) -> Result<(), InfraError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            self.take_failure()?;
            self.rows.lock().expect("rows lock").remove(day);
            Ok(())
        }

        async fn list_days_after(
            &self,
            _identity: &RemoteIdentity,
            after: &str,
        ) -> Result<Vec<RemoteDayRow>, InfraError> {
            self.take_failure()?;
            Ok(self
                .rows
                .lock()
                .expect("rows lock")
                .iter()
                .filter(|(day, _)| day.as_str() > after && !is_sentinel_day(day))
                .map(|(day, payload)| RemoteDayRow {
                    day: day.clone(),
                    payload: payload.clone(),
                    updated_at: None,
                })
                .collect())
        }
    }

    fn identity() -> RemoteIdentity {
        RemoteIdentity {
            user_id: "user-1".to_string(),
            access_token: "token".to_string(),
        }
    }

    fn fast_retry(max_attempts: u8) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 1,
        }
    }

    fn record_with(hour: u8, planned: &str) -> DayRecord {
        let mut record = DayRecord::default();
        record.slots.insert(
            hour.to_string(),
            SlotRecord {
                planned: planned.to_string(),
                ..SlotRecord::default()
            },
        );
        record
    }

    #[tokio::test]
    async fn push_day_skips_unchanged_signature() {
        let client = Arc::new(FakeRemoteClient::default());
        let service = RemoteSyncService::new(Arc::clone(&client));
        let record = record_with(9, "Deep Work");

        assert_eq!(
            service.push_day(&identity(), "2026-02-16", &record).await.expect("push"),
            PushOutcome::Upserted
        );
        assert_eq!(
            service.push_day(&identity(), "2026-02-16", &record).await.expect("push"),
            PushOutcome::Unchanged
        );
        assert_eq!(client.upsert_calls.load(Ordering::SeqCst), 1);

        let changed = record_with(9, "Writing");
        service.push_day(&identity(), "2026-02-16", &changed).await.expect("push");
        assert_eq!(client.upsert_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            client.row("2026-02-16").expect("row")["slots"]["9"]["planned"],
            "Writing"
        );
    }

    #[tokio::test]
    async fn empty_day_deletes_remote_row() {
        let client = Arc::new(FakeRemoteClient::with_rows(vec![(
            "2026-02-16",
            json!({"slots": {"9": {"planned": "Deep Work"}}}),
        )]));
        let service = RemoteSyncService::new(Arc::clone(&client));

        let outcome = service
            .push_day(&identity(), "2026-02-16", &DayRecord::default())
            .await
            .expect("push");
        assert_eq!(outcome, PushOutcome::Deleted);
        assert!(client.row("2026-02-16").is_none());
    }

    #[tokio::test]
    async fn failed_push_is_not_remembered() {
        let client = Arc::new(FakeRemoteClient::default());
        let service = RemoteSyncService::new(Arc::clone(&client));
        client.fail_next("network error while upserting day");

        let record = record_with(9, "Deep Work");
        assert!(service.push_day(&identity(), "2026-02-16", &record).await.is_err());
        assert_eq!(service.last_signature(&identity(), "2026-02-16"), None);
        assert_eq!(
            service.push_day(&identity(), "2026-02-16", &record).await.expect("push"),
            PushOutcome::Upserted
        );
    }

    #[tokio::test]
    async fn fetch_retries_transient_failures() {
        let client = Arc::new(FakeRemoteClient::with_rows(vec![(
            "2026-02-16",
            json!({"slots": {"9": {"planned": "Deep Work"}}}),
        )]));
        client.fail_next("network error while fetching day");
        let service = RemoteSyncService::new(Arc::clone(&client)).with_retry_policy(fast_retry(2));

        let record = service
            .fetch_day(&identity(), "2026-02-16")
            .await
            .expect("fetch")
            .expect("row exists");
        assert_eq!(record.slot(9).expect("slot").planned, "Deep Work");
        assert_eq!(client.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_does_not_retry_client_errors() {
        let client = Arc::new(FakeRemoteClient::default());
        client.fail_next("remote fetch failed with status 401");
        let service = RemoteSyncService::new(Arc::clone(&client)).with_retry_policy(fast_retry(3));

        assert!(service.fetch_day(&identity(), "2026-02-16").await.is_err());
        assert_eq!(client.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_classification_matches_transient_messages() {
        assert!(should_retry(&InfraError::Remote("remote upsert failed with status 503".to_string())));
        assert!(should_retry(&InfraError::Remote("request timed out".to_string())));
        assert!(!should_retry(&InfraError::Remote("remote upsert failed with status 400".to_string())));
        assert!(!should_retry(&InfraError::NotFound("day".to_string())));
    }

    #[tokio::test]
    async fn catalogs_round_trip_through_sentinel_rows() {
        let client = Arc::new(FakeRemoteClient::default());
        let service = RemoteSyncService::new(Arc::clone(&client));
        let mut catalog = RoutineCatalog::default();
        catalog.version = 3;
        catalog.items.push(Routine {
            id: "rtn-1".to_string(),
            label: "Workout".to_string(),
            start_hour: 6,
            duration_hours: 1,
            pattern: RoutinePattern::Weekday,
            pass_dates: Vec::new(),
            stopped_at_ms: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_by: None,
        });
        let activities = ActivityCatalog {
            items: vec!["Write".to_string(), "Read".to_string()],
        };

        service.push_routine_catalog(&identity(), &catalog).await.expect("push routines");
        service.push_activity_catalog(&identity(), &activities).await.expect("push activities");
        assert!(client.row(ROUTINE_CATALOG_DAY).is_some());

        let fresh = RemoteSyncService::new(Arc::clone(&client));
        assert_eq!(
            fresh.fetch_routine_catalog(&identity()).await.expect("fetch"),
            Some(catalog)
        );
        assert_eq!(
            fresh.fetch_activity_catalog(&identity()).await.expect("fetch"),
            Some(activities)
        );
    }

    #[tokio::test]
    async fn sweep_clears_later_fills_and_counts_failures() {
        let client = Arc::new(FakeRemoteClient::with_rows(vec![
            ("2026-02-15", json!({"slots": {"6": {"planned": "Workout"}}})),
            ("2026-02-17", json!({"slots": {"6": {"planned": "Workout"}}})),
            (
                "2026-02-18",
                json!({"slots": {"6": {"planned": "Workout"}, "9": {"planned": "Other"}}}),
            ),
            (
                "2026-02-19",
                json!({"slots": {"6": {"planned": "Workout", "merged": {"planned": {"endHour": 7, "value": "Workout"}}}}}),
            ),
            ("2026-02-20", json!({"slots": "not-a-map"})),
        ]));
        let service = RemoteSyncService::new(Arc::clone(&client));
        let sweep = StopSweep {
            routine_id: "rtn-1".to_string(),
            label: "Workout".to_string(),
            hours: vec![6],
            after: NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
        };

        let report = service.sweep_stopped_routine(&identity(), &sweep).await;
        assert_eq!(
            report,
            SweepReport {
                days_scanned: 4,
                days_updated: 2,
                slots_cleared: 2,
                failures: 1,
            }
        );
        assert!(client.row("2026-02-15").is_some());
        assert!(client.row("2026-02-17").is_none());
        assert_eq!(client.row("2026-02-18").expect("row")["slots"]["9"]["planned"], "Other");
        assert!(client.row("2026-02-18").expect("row")["slots"].get("6").is_none());
        assert!(client.row("2026-02-19").expect("row")["slots"].get("6").is_some());
    }

    #[tokio::test]
    async fn realtime_change_ignores_own_echo() {
        let client = Arc::new(FakeRemoteClient::default());
        let service = RemoteSyncService::new(Arc::clone(&client));
        let record = record_with(9, "Deep Work");
        service.push_day(&identity(), "2026-02-16", &record).await.expect("push");

        let echo = service
            .resolve_realtime_change(&identity(), "2026-02-16", "local-edit-in-progress")
            .await
            .expect("resolve");
        assert_eq!(echo, None);

        client.rows.lock().expect("rows lock").insert(
            "2026-02-16".to_string(),
            json!({"slots": {"9": {"planned": "Other device"}}}),
        );
        let update = service
            .resolve_realtime_change(&identity(), "2026-02-16", &record.signature())
            .await
            .expect("resolve");
        match update {
            Some(RealtimeUpdate::Day(remote)) => {
                assert_eq!(remote.slot(9).expect("slot").planned, "Other device");
            }
            other => panic!("expected day update, got {other:?}"),
        }

        client.rows.lock().expect("rows lock").remove("2026-02-16");
        let deleted = service
            .resolve_realtime_change(&identity(), "2026-02-16", "anything")
            .await
            .expect("resolve");
        assert_eq!(deleted, Some(RealtimeUpdate::Day(DayRecord::default())));
    }
}
