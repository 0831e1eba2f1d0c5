use crate::application::bootstrap::BootstrapResult;
use crate::application::day_session::{DaySession, RowRenderModel};
use crate::application::remote_sync::{
    RealtimeUpdate, RemoteSyncService, SweepReport, activity_catalog_signature,
    routine_catalog_signature,
};
use crate::application::save_scheduler::{SaveClass, SaveScheduler, SaveStatus};
use crate::domain::balancer::Adjustment;
use crate::domain::day_record::{
    ACTIVITY_CATALOG_DAY, DayRecord, ROUTINE_CATALOG_DAY, decode_activity_catalog, decode_day,
    decode_routine_catalog, encode_activity_catalog, encode_day, encode_routine_catalog,
};
use crate::domain::decomposer::GridUnit;
use crate::domain::merge_registry::MergeKey;
use crate::domain::models::{ActivityCatalog, ActivityItem, MergeChannel, Routine};
use crate::domain::routine::{self, RoutineCatalog, RoutineDraft, RoutinePatch};
use crate::infrastructure::config::{PlannerConfig, RemoteConfig};
use crate::infrastructure::day_store::{LocalDayStore, SqliteDayStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_client::{RemoteDayClient, RemoteIdentity, ReqwestRemoteDayClient};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct RuntimeState {
    session: DaySession,
    routines: RoutineCatalog,
    activities: ActivityCatalog,
    identity: Option<RemoteIdentity>,
    scheduler: SaveScheduler,
    day_signature: String,
    routines_signature: String,
    activities_signature: String,
    // Days left behind with a remote push still owed.
    unsynced_days: BTreeMap<String, DayRecord>,
}

impl RuntimeState {
    fn actor(&self) -> Option<String> {
        self.identity.as_ref().map(|identity| identity.user_id.clone())
    }

    fn reconcile(&mut self, now: DateTime<Utc>) -> BTreeSet<SaveClass> {
        let remote = self.identity.is_some();
        let mut scheduled = BTreeSet::new();

        let day = self.session.signature();
        if day != self.day_signature {
            self.day_signature = day;
            scheduled.insert(SaveClass::Local);
            if remote {
                scheduled.insert(SaveClass::RemoteDay);
            }
        }
        let routines = routine_catalog_signature(&self.routines);
        if routines != self.routines_signature {
            self.routines_signature = routines;
            scheduled.insert(SaveClass::Local);
            if remote {
                scheduled.insert(SaveClass::RemoteRoutines);
            }
        }
        let activities = activity_catalog_signature(&self.activities);
        if activities != self.activities_signature {
            self.activities_signature = activities;
            scheduled.insert(SaveClass::Local);
            if remote {
                scheduled.insert(SaveClass::RemoteCatalog);
            }
        }

        for class in &scheduled {
            self.scheduler.schedule(*class, now);
        }
        scheduled
    }

    fn replace_session(&mut self, session: DaySession) {
        self.day_signature = session.signature();
        self.session = session;
    }

    fn snapshot(&self) -> SaveSnapshot {
        SaveSnapshot {
            day: self.session.day_key(),
            record: self.session.to_record(),
            routines: self.routines.clone(),
            activities: self.activities.clone(),
            identity: self.identity.clone(),
            unsynced_days: self
                .unsynced_days
                .iter()
                .map(|(day, record)| (day.clone(), record.clone()))
                .collect(),
        }
    }
}

struct SaveSnapshot {
    day: String,
    record: DayRecord,
    routines: RoutineCatalog,
    activities: ActivityCatalog,
    identity: Option<RemoteIdentity>,
    unsynced_days: Vec<(String, DayRecord)>,
}

pub struct Planner<L, C>
where
    L: LocalDayStore,
    C: RemoteDayClient,
{
    config: PlannerConfig,
    local: Arc<L>,
    remote: Option<RemoteSyncService<C>>,
    runtime: Mutex<RuntimeState>,
    now_provider: NowProvider,
}

impl Planner<SqliteDayStore, ReqwestRemoteDayClient> {
    pub fn open(
        bootstrap: &BootstrapResult,
        remote: Option<&RemoteConfig>,
        today: NaiveDate,
    ) -> Result<Self, InfraError> {
        let local = Arc::new(SqliteDayStore::new(&bootstrap.database_path));
        let remote = remote.map(|config| Arc::new(ReqwestRemoteDayClient::new(config)));
        Self::new(bootstrap.config.clone(), local, remote, today)
    }
}

impl<L, C> Planner<L, C>
where
    L: LocalDayStore + 'static,
    C: RemoteDayClient + 'static,
{
    pub fn new(
        config: PlannerConfig,
        local: Arc<L>,
        remote: Option<Arc<C>>,
        today: NaiveDate,
    ) -> Result<Self, InfraError> {
        let routines = local
            .get(ROUTINE_CATALOG_DAY)?
            .map(|payload| decode_routine_catalog(&payload))
            .transpose()?
            .unwrap_or_default();
        let activities = local
            .get(ACTIVITY_CATALOG_DAY)?
            .map(|payload| decode_activity_catalog(&payload))
            .transpose()?
            .unwrap_or_default();
        let record = read_local_day(local.as_ref(), &today.to_string())?.unwrap_or_default();
        let session = DaySession::from_record(today, &record, config.app.day_start);

        let runtime = RuntimeState {
            day_signature: session.signature(),
            routines_signature: routine_catalog_signature(&routines),
            activities_signature: activity_catalog_signature(&activities),
            session,
            routines,
            activities,
            identity: None,
            scheduler: SaveScheduler::new(config.debounce, config.retry),
            unsynced_days: BTreeMap::new(),
        };
        let remote = remote.map(|client| {
            RemoteSyncService::new(client).with_retry_policy(config.retry.into())
        });

        Ok(Self {
            config,
            local,
            remote,
            runtime: Mutex::new(runtime),
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn lock_runtime(&self) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
        self.runtime
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("runtime lock poisoned: {error}")))
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn date(&self) -> Result<NaiveDate, InfraError> {
        Ok(self.lock_runtime()?.session.date())
    }

    pub fn with_session<T>(&self, read: impl FnOnce(&DaySession) -> T) -> Result<T, InfraError> {
        Ok(read(&self.lock_runtime()?.session))
    }

    pub fn routines(&self) -> Result<RoutineCatalog, InfraError> {
        Ok(self.lock_runtime()?.routines.clone())
    }

    pub fn activity_catalog(&self) -> Result<ActivityCatalog, InfraError> {
        Ok(self.lock_runtime()?.activities.clone())
    }

    pub fn save_status(&self, class: SaveClass) -> Result<SaveStatus, InfraError> {
        Ok(self.lock_runtime()?.scheduler.status(class))
    }

    pub fn pending_remote_sync(&self) -> Result<bool, InfraError> {
        Ok(self.lock_runtime()?.scheduler.pending_remote_sync())
    }

    pub fn is_signed_in(&self) -> Result<bool, InfraError> {
        Ok(self.lock_runtime()?.identity.is_some())
    }

    pub fn row_render_models(&self) -> Result<Vec<RowRenderModel>, InfraError> {
        let now = self.now();
        let runtime = self.lock_runtime()?;
        Ok(runtime.session.row_render_models(&runtime.routines, now))
    }

    pub fn grid_units(&self, index: usize) -> Result<Vec<GridUnit>, InfraError> {
        Ok(self.lock_runtime()?.session.grid_units(index))
    }

    fn edit<T>(
        &self,
        command: &'static str,
        apply: impl FnOnce(&mut RuntimeState, &PlannerConfig, DateTime<Utc>) -> T,
    ) -> Result<T, InfraError> {
        let now = self.now();
        let mut guard = self.lock_runtime()?;
        let runtime = &mut *guard;
        let value = apply(runtime, &self.config, now);
        let scheduled = runtime.reconcile(now);
        tracing::debug!(command, scheduled = scheduled.len(), "command applied");
        Ok(value)
    }

    // Day switching and the save pipeline.

    pub async fn load_date(&self, date: NaiveDate) -> Result<(), InfraError> {
        let (flushed_day, flushed_signature) = self.flush_current().await?;

        let day = date.to_string();
        let local_record = read_local_day(self.local.as_ref(), &day)?;
        let identity = self.lock_runtime()?.identity.clone();
        let (remote_record, last_exchanged) = match (&self.remote, identity) {
            (Some(remote), Some(identity)) => {
                let last_exchanged = remote.last_signature(&identity, &day);
                let fetched = match remote.fetch_day(&identity, &day).await {
                    Ok(record) => record,
                    Err(error) => {
                        tracing::warn!(command = "load_date", day = day.as_str(), error = %error, "remote fetch failed; using local record");
                        None
                    }
                };
                (fetched, last_exchanged)
            }
            _ => (None, None),
        };

        let now = self.now();
        let mut guard = self.lock_runtime()?;
        let runtime = &mut *guard;
        self.settle_outgoing(runtime, &flushed_day, &flushed_signature)?;

        let parked = runtime.unsynced_days.remove(&day);
        let local_unsynced = parked.is_some()
            || matches!(
                (&local_record, &last_exchanged),
                (Some(local), Some(last)) if local.signature() != *last
            );
        let local_record = parked.or(local_record);
        let (record, adopt_remote) = match (remote_record, local_record) {
            (Some(_), Some(local)) if local_unsynced => (local, false),
            (Some(remote), local) => {
                let adopt = local.as_ref() != Some(&remote);
                (remote, adopt)
            }
            (None, local) => (local.unwrap_or_default(), false),
        };
        runtime.replace_session(DaySession::from_record(date, &record, self.config.app.day_start));
        if adopt_remote {
            runtime.scheduler.schedule(SaveClass::Local, now);
        }
        if local_unsynced && runtime.identity.is_some() {
            runtime.scheduler.schedule(SaveClass::RemoteDay, now);
        }
        let filled = runtime.session.apply_routines(&runtime.routines, self.config.app.timezone);
        runtime.reconcile(now);
        tracing::info!(command = "load_date", day = day.as_str(), filled, adopt_remote, local_unsynced);
        Ok(())
    }

    // Called under the lock right before the outgoing session is replaced.
    // Writes edits that landed after the flush and keeps the record around
    // while its remote push is still owed.
    fn settle_outgoing(
        &self,
        runtime: &mut RuntimeState,
        flushed_day: &str,
        flushed_signature: &str,
    ) -> Result<(), InfraError> {
        let day = runtime.session.day_key();
        let record = runtime.session.to_record();
        let signature = record.signature();
        let edited = day != flushed_day || signature != flushed_signature;
        if edited {
            self.write_local_day(&day, &record)?;
            tracing::info!(command = "load_date", day = day.as_str(), "edit landed during day switch; saved before swap");
        }

        let (Some(remote), Some(identity)) = (&self.remote, &runtime.identity) else {
            return Ok(());
        };
        let last = remote.last_signature(identity, &day);
        let synced = last.as_deref() == Some(signature.as_str());
        let unknown_blank = record.is_empty() && last.is_none();
        if !synced && !unknown_blank && (edited || runtime.scheduler.is_outstanding(SaveClass::RemoteDay)) {
            runtime.unsynced_days.insert(day, record);
            runtime.scheduler.schedule(SaveClass::RemoteDay, self.now());
        }
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), InfraError> {
        self.flush_current().await.map(|_| ())
    }

    async fn flush_current(&self) -> Result<(String, String), InfraError> {
        let (classes, snapshot) = {
            let mut runtime = self.lock_runtime()?;
            (runtime.scheduler.flush_all(), runtime.snapshot())
        };
        let flushed = (snapshot.day.clone(), snapshot.record.signature());
        self.run_saves(classes, snapshot).await?;
        Ok(flushed)
    }

    pub async fn tick(&self) -> Result<Vec<SaveClass>, InfraError> {
        let now = self.now();
        let (classes, snapshot) = {
            let mut runtime = self.lock_runtime()?;
            runtime.reconcile(now);
            (runtime.scheduler.take_due(now), runtime.snapshot())
        };
        self.run_saves(classes.clone(), snapshot).await?;
        Ok(classes)
    }

    async fn run_saves(&self, classes: Vec<SaveClass>, snapshot: SaveSnapshot) -> Result<(), InfraError> {
        if classes.is_empty() {
            return Ok(());
        }
        let mut results = Vec::with_capacity(classes.len());
        for class in classes {
            let result = self.save_class(class, &snapshot).await;
            results.push((class, result));
        }

        let now = self.now();
        let mut runtime = self.lock_runtime()?;
        for (class, result) in results {
            if class.is_remote() && runtime.identity != snapshot.identity {
                continue;
            }
            match result {
                Ok(()) => runtime.scheduler.mark_saved(class, now),
                Err(error) => {
                    let retry_at = runtime.scheduler.mark_failed(class, error.to_string(), now);
                    tracing::warn!(
                        class = class.as_str(),
                        day = snapshot.day.as_str(),
                        error = %error,
                        retry_at = ?retry_at,
                        "save failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn save_class(&self, class: SaveClass, snapshot: &SaveSnapshot) -> Result<(), InfraError> {
        if class == SaveClass::Local {
            return self.save_local(snapshot);
        }
        let (Some(remote), Some(identity)) = (&self.remote, &snapshot.identity) else {
            return Err(InfraError::Remote("remote sync is not signed in".to_string()));
        };
        match class {
            SaveClass::RemoteRoutines => remote.push_routine_catalog(identity, &snapshot.routines).await?,
            SaveClass::RemoteCatalog => remote.push_activity_catalog(identity, &snapshot.activities).await?,
            _ => return self.push_days(remote, identity, snapshot).await,
        };
        Ok(())
    }

    async fn push_days(
        &self,
        remote: &RemoteSyncService<C>,
        identity: &RemoteIdentity,
        snapshot: &SaveSnapshot,
    ) -> Result<(), InfraError> {
        let mut first_error = None;
        for (day, record) in &snapshot.unsynced_days {
            if *day == snapshot.day {
                continue;
            }
            match remote.push_day(identity, day, record).await {
                Ok(_) => self.mark_day_synced(day, record)?,
                Err(error) => {
                    tracing::warn!(day = day.as_str(), error = %error, "owed day push failed");
                    first_error.get_or_insert(error);
                }
            }
        }
        let unknown_blank =
            snapshot.record.is_empty() && remote.last_signature(identity, &snapshot.day).is_none();
        if !unknown_blank {
            remote.push_day(identity, &snapshot.day, &snapshot.record).await?;
        }
        first_error.map_or(Ok(()), Err)
    }

    fn mark_day_synced(&self, day: &str, record: &DayRecord) -> Result<(), InfraError> {
        let mut runtime = self.lock_runtime()?;
        if runtime.unsynced_days.get(day) == Some(record) {
            runtime.unsynced_days.remove(day);
        }
        Ok(())
    }

    fn write_local_day(&self, day: &str, record: &DayRecord) -> Result<(), InfraError> {
        if record.is_empty() {
            self.local.remove(day)?;
        } else {
            self.local.set(day, &encode_day(record)?, self.now())?;
        }
        Ok(())
    }

    fn save_local(&self, snapshot: &SaveSnapshot) -> Result<(), InfraError> {
        let now = self.now();
        self.write_local_day(&snapshot.day, &snapshot.record)?;
        self.local
            .set(ROUTINE_CATALOG_DAY, &encode_routine_catalog(&snapshot.routines)?, now)?;
        self.local
            .set(ACTIVITY_CATALOG_DAY, &encode_activity_catalog(&snapshot.activities)?, now)?;
        Ok(())
    }

    // Identity.

    pub async fn sign_in(&self, identity: RemoteIdentity) -> Result<(), InfraError> {
        let Some(remote) = &self.remote else {
            return Err(InfraError::InvalidConfig("remote sync is not configured".to_string()));
        };
        if identity.user_id.trim().is_empty() {
            return Err(InfraError::InvalidInput("user_id must not be empty".to_string()));
        }
        let day = {
            let mut runtime = self.lock_runtime()?;
            if runtime
                .identity
                .as_ref()
                .is_some_and(|current| current.user_id != identity.user_id)
            {
                runtime.unsynced_days.clear();
            }
            runtime.identity = Some(identity.clone());
            runtime.session.day_key()
        };

        let routines = remote.fetch_routine_catalog(&identity).await;
        let activities = remote.fetch_activity_catalog(&identity).await;
        let record = remote.fetch_day(&identity, &day).await;

        let now = self.now();
        let mut guard = self.lock_runtime()?;
        let runtime = &mut *guard;
        if runtime.identity.as_ref() != Some(&identity) {
            return Ok(());
        }
        let local_edits_pending = runtime.scheduler.is_scheduled(SaveClass::Local);

        match routines {
            Ok(Some(remote_routines)) if remote_routines.version > runtime.routines.version => {
                runtime.routines_signature = routine_catalog_signature(&remote_routines);
                runtime.routines = remote_routines;
                runtime.scheduler.schedule(SaveClass::Local, now);
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(command = "sign_in", error = %error, "routine catalog fetch failed"),
        }
        match activities {
            Ok(Some(remote_activities)) => {
                let mut merged = remote_activities.clone();
                let local_items = runtime
                    .activities
                    .items
                    .iter()
                    .map(|label| ActivityItem::new(label.clone(), 0, Default::default()))
                    .collect::<Vec<_>>();
                merged.extend_from(&local_items);
                if merged != runtime.activities {
                    runtime.activities_signature = activity_catalog_signature(&remote_activities);
                    runtime.activities = merged;
                    runtime.scheduler.schedule(SaveClass::Local, now);
                }
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(command = "sign_in", error = %error, "activity catalog fetch failed"),
        }
        match record {
            Ok(Some(record)) if !local_edits_pending => {
                let date = runtime.session.date();
                runtime.replace_session(DaySession::from_record(date, &record, self.config.app.day_start));
                runtime.scheduler.schedule(SaveClass::Local, now);
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(command = "sign_in", error = %error, "day fetch failed"),
        }

        runtime.session.apply_routines(&runtime.routines, self.config.app.timezone);
        runtime.reconcile(now);
        for class in [SaveClass::RemoteDay, SaveClass::RemoteRoutines, SaveClass::RemoteCatalog] {
            runtime.scheduler.schedule(class, now);
        }
        runtime.scheduler.resume_remote(now);
        tracing::info!(command = "sign_in", user_id = identity.user_id.as_str());
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), InfraError> {
        let mut runtime = self.lock_runtime()?;
        runtime.identity = None;
        runtime.scheduler.cancel_remote();
        runtime.unsynced_days.clear();
        if let Some(remote) = &self.remote {
            remote.clear_signatures()?;
        }
        tracing::info!(command = "sign_out");
        Ok(())
    }

    pub async fn on_realtime_change(&self, day: &str) -> Result<bool, InfraError> {
        let Some(remote) = &self.remote else {
            return Ok(false);
        };
        let (identity, current) = {
            let runtime = self.lock_runtime()?;
            let Some(identity) = runtime.identity.clone() else {
                return Ok(false);
            };
            let Some(current) = current_signature(&runtime, day) else {
                return Ok(false);
            };
            if runtime.scheduler.is_outstanding(remote_class_for(day)) {
                tracing::info!(command = "on_realtime_change", day, "local changes not pushed yet; notification ignored");
                return Ok(false);
            }
            (identity, current)
        };

        let Some(update) = remote.resolve_realtime_change(&identity, day, &current).await? else {
            return Ok(false);
        };

        let now = self.now();
        let mut guard = self.lock_runtime()?;
        let runtime = &mut *guard;
        if runtime.identity.as_ref() != Some(&identity)
            || current_signature(runtime, day).as_deref() != Some(current.as_str())
            || runtime.scheduler.is_outstanding(remote_class_for(day))
        {
            tracing::info!(command = "on_realtime_change", day, "local state moved on; snapshot ignored");
            return Ok(false);
        }

        match update {
            RealtimeUpdate::Day(record) => {
                let date = runtime.session.date();
                runtime.replace_session(DaySession::from_record(date, &record, self.config.app.day_start));
            }
            RealtimeUpdate::Routines(catalog) => {
                runtime.routines_signature = routine_catalog_signature(&catalog);
                runtime.routines = catalog;
            }
            RealtimeUpdate::Activities(catalog) => {
                runtime.activities_signature = activity_catalog_signature(&catalog);
                runtime.activities = catalog;
            }
        }
        runtime.scheduler.schedule(SaveClass::Local, now);
        runtime.session.apply_routines(&runtime.routines, self.config.app.timezone);
        runtime.reconcile(now);
        tracing::info!(command = "on_realtime_change", day, "remote change applied");
        Ok(true)
    }

    // Slot edits.

    pub fn set_planned(&self, index: usize, text: &str) -> Result<bool, InfraError> {
        self.edit("set_planned", |runtime, _, _| runtime.session.set_planned(index, text))
    }

    pub fn set_actual(&self, index: usize, text: &str) -> Result<bool, InfraError> {
        self.edit("set_actual", |runtime, _, _| runtime.session.set_actual(index, text))
    }

    pub fn set_details(&self, index: usize, details: &str) -> Result<bool, InfraError> {
        self.edit("set_details", |runtime, _, _| runtime.session.set_details(index, details))
    }

    pub fn set_plan_title(&self, index: usize, title: &str, band_on: bool) -> Result<bool, InfraError> {
        self.edit("set_plan_title", |runtime, _, _| {
            runtime.session.set_plan_title(index, title, band_on)
        })
    }

    pub fn set_actual_title_band(&self, index: usize, band_on: bool) -> Result<bool, InfraError> {
        self.edit("set_actual_title_band", |runtime, _, _| {
            runtime.session.set_actual_title_band(index, band_on)
        })
    }

    pub fn set_plan_activities(
        &self,
        index: usize,
        items: &[ActivityItem],
    ) -> Result<Vec<ActivityItem>, InfraError> {
        for item in items {
            item.validate().map_err(InfraError::InvalidInput)?;
        }
        self.edit("set_plan_activities", |runtime, _, _| {
            let stored = runtime
                .session
                .set_plan_activities(index, items)
                .unwrap_or_default();
            runtime.activities.extend_from(&stored);
            stored
        })
    }

    pub fn edit_plan_activity_seconds(
        &self,
        index: usize,
        entry: usize,
        seconds: u64,
    ) -> Result<Option<Adjustment>, InfraError> {
        self.edit("edit_plan_activity_seconds", |runtime, config, _| {
            runtime
                .session
                .edit_plan_activity_seconds(index, entry, seconds, config.app.plan_step_seconds)
        })
    }

    pub fn record_actual_activities(&self, index: usize, items: &[ActivityItem]) -> Result<u64, InfraError> {
        for item in items {
            item.validate().map_err(InfraError::InvalidInput)?;
        }
        let unassigned = self.edit("record_actual_activities", |runtime, _, _| {
            runtime.session.record_actual_activities(index, items)
        })?;
        unassigned.ok_or_else(|| InfraError::InvalidInput(format!("slot index out of range: {index}")))
    }

    pub fn edit_actual_activity_seconds(
        &self,
        index: usize,
        entry: usize,
        seconds: u64,
    ) -> Result<Option<Adjustment>, InfraError> {
        self.edit("edit_actual_activity_seconds", |runtime, _, _| {
            runtime.session.edit_actual_activity_seconds(index, entry, seconds)
        })
    }

    pub fn toggle_actual_grid_unit(&self, index: usize, unit: usize) -> Result<bool, InfraError> {
        self.edit("toggle_actual_grid_unit", |runtime, _, _| {
            runtime.session.toggle_actual_grid_unit(index, unit)
        })
    }

    // Timers.

    pub fn start_timer(&self, index: usize) -> Result<Vec<usize>, InfraError> {
        self.edit("start_timer", |runtime, _, now| runtime.session.start_timer(index, now))
    }

    pub fn stop_timer(&self, index: usize) -> Result<bool, InfraError> {
        self.edit("stop_timer", |runtime, _, now| runtime.session.stop_timer(index, now))
    }

    pub fn reset_timer(&self, index: usize) -> Result<(), InfraError> {
        self.edit("reset_timer", |runtime, _, _| runtime.session.reset_timer(index))
    }

    pub fn set_timer_text(&self, index: usize, text: &str) -> Result<bool, InfraError> {
        self.edit("set_timer_text", |runtime, _, _| runtime.session.set_timer_text(index, text))
    }

    // Merges.

    pub fn merge(
        &self,
        channel: MergeChannel,
        start: usize,
        end: usize,
        value: &str,
    ) -> Result<Option<MergeKey>, InfraError> {
        self.edit("merge", |runtime, _, _| runtime.session.merge(channel, start, end, value))
    }

    pub fn unmerge(&self, key: &str) -> Result<bool, InfraError> {
        let Some(key) = MergeKey::parse(key) else {
            tracing::warn!(command = "unmerge", key, "ignoring malformed merge key");
            return Ok(false);
        };
        self.edit("unmerge", |runtime, _, _| runtime.session.unmerge(&key))
    }

    // Routines.

    pub fn upsert_routine(&self, draft: RoutineDraft) -> Result<Routine, InfraError> {
        let routine = self.edit("upsert_routine", |runtime, config, now| {
            let actor = runtime.actor();
            let routine = runtime.routines.upsert_by_window(draft, now, actor.as_deref())?;
            runtime
                .session
                .apply_routines(&runtime.routines, config.app.timezone);
            Ok::<_, String>(routine)
        })?;
        let routine = routine.map_err(InfraError::InvalidInput)?;
        tracing::info!(command = "upsert_routine", routine_id = routine.id.as_str());
        Ok(routine)
    }

    pub fn update_routine(&self, id: &str, patch: RoutinePatch) -> Result<Routine, InfraError> {
        let routine = self.edit("update_routine", |runtime, config, now| {
            let actor = runtime.actor();
            let routine = runtime.routines.update(id, patch, now, actor.as_deref())?;
            runtime
                .session
                .apply_routines(&runtime.routines, config.app.timezone);
            Ok::<_, String>(routine)
        })?;
        let routine = routine.map_err(InfraError::InvalidInput)?;
        tracing::info!(command = "update_routine", routine_id = routine.id.as_str());
        Ok(routine)
    }

    pub fn pass_routine(&self, id: &str) -> Result<usize, InfraError> {
        let cleared = self.edit("pass_routine", |runtime, _, now| {
            let actor = runtime.actor();
            let date = runtime.session.date();
            let (grid, merges) = runtime.session.parts_mut();
            routine::pass_routine(grid, merges, &mut runtime.routines, id, date, now, actor.as_deref())
        })?;
        let cleared = cleared.ok_or_else(|| InfraError::NotFound(format!("routine not found: {id}")))?;
        tracing::info!(command = "pass_routine", routine_id = id, cleared);
        Ok(cleared)
    }

    pub async fn stop_routine(&self, id: &str) -> Result<SweepReport, InfraError> {
        let (sweep, identity) = {
            let now = self.now();
            let mut guard = self.lock_runtime()?;
            let runtime = &mut *guard;
            let actor = runtime.actor();
            let date = runtime.session.date();
            let (grid, merges) = runtime.session.parts_mut();
            let sweep = routine::stop_routine(
                grid,
                merges,
                &mut runtime.routines,
                id,
                date,
                self.config.app.timezone,
                now,
                actor.as_deref(),
            )
            .ok_or_else(|| InfraError::NotFound(format!("routine not found: {id}")))?;
            runtime.reconcile(now);
            (sweep, runtime.identity.clone())
        };

        let report = match (&self.remote, identity) {
            (Some(remote), Some(identity)) => remote.sweep_stopped_routine(&identity, &sweep).await,
            _ => SweepReport::default(),
        };

        self.edit("stop_routine", |runtime, _, now| {
            let actor = runtime.actor();
            runtime.routines.evict(id, now, actor.as_deref());
        })?;
        tracing::info!(
            command = "stop_routine",
            routine_id = id,
            days_updated = report.days_updated,
            failures = report.failures,
        );
        Ok(report)
    }
}

fn read_local_day<L: LocalDayStore + ?Sized>(local: &L, day: &str) -> Result<Option<DayRecord>, InfraError> {
    local
        .get(day)?
        .map(|payload| decode_day(&payload).map_err(InfraError::from))
        .transpose()
}

fn current_signature(runtime: &RuntimeState, day: &str) -> Option<String> {
    match day {
        ROUTINE_CATALOG_DAY => Some(routine_catalog_signature(&runtime.routines)),
        ACTIVITY_CATALOG_DAY => Some(activity_catalog_signature(&runtime.activities)),
        _ if day == runtime.session.day_key() => Some(runtime.session.signature()),
        _ => None,
    }
}

fn remote_class_for(day: &str) -> SaveClass {
    match day {
        ROUTINE_CATALOG_DAY => SaveClass::RemoteRoutines,
        ACTIVITY_CATALOG_DAY => SaveClass::RemoteCatalog,
        _ => SaveClass::RemoteDay,
    }
}

pub fn spawn_reconciler<L, C>(planner: Arc<Planner<L, C>>) -> JoinHandle<()>
where
    L: LocalDayStore + 'static,
    C: RemoteDayClient + 'static,
{
    let seconds = planner.config.app.reconcile_interval_seconds.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(seconds));
        loop {
            interval.tick().await;
            if let Err(error) = planner.tick().await {
                tracing::error!(command = "tick", error = %error, "reconciliation failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bootstrap::bootstrap_workspace;
    use crate::domain::day_record::is_sentinel_day;
    use crate::domain::models::{ActivitySource, RoutinePattern};
    use crate::infrastructure::day_store::InMemoryDayStore;
    use crate::infrastructure::remote_client::RemoteDayRow;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::{Value, json};
    use std::collections::{BTreeMap, VecDeque};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "dayplan-planner-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    type FetchHook = Box<dyn FnOnce() + Send>;

    #[derive(Default)]
    struct FakeRemoteClient {
        rows: Mutex<BTreeMap<String, Value>>,
        failures: Mutex<VecDeque<String>>,
        upsert_calls: AtomicUsize,
        fetch_hook: Mutex<Option<FetchHook>>,
    }

    impl FakeRemoteClient {
        fn on_next_fetch(&self, hook: impl FnOnce() + Send + 'static) {
            *self.fetch_hook.lock().expect("hook lock") = Some(Box::new(hook));
        }

        fn row(&self, day: &str) -> Option<Value> {
            self.rows.lock().expect("rows lock").get(day).cloned()
        }

        fn put(&self, day: &str, payload: Value) {
            self.rows.lock().expect("rows lock").insert(day.to_string(), payload);
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
    }

    #[async_trait]
    impl RemoteDayClient for FakeRemoteClient {
        async fn upsert_day(&self, _identity: &RemoteIdentity, day: &str, payload: &Value) -> Result<(), InfraError> {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
            self.take_failure()?;
            self.put(day, payload.clone());
            Ok(())
        }

        async fn fetch_day(&self, _identity: &RemoteIdentity, day: &str) -> Result<Option<RemoteDayRow>, InfraError> {
            let hook = self.fetch_hook.lock().expect("hook lock").take();
            if let Some(hook) = hook {
                hook();
            }
            Ok(self.row(day).map(|payload| RemoteDayRow {
                day: day.to_string(),
                payload,
                updated_at: None,
            }))
        }

        async fn delete_day(&self, _identity: &RemoteIdentity, day: &str) -> Result<(), InfraError> {
            self.take_failure()?;
            self.rows.lock().expect("rows lock").remove(day);
            Ok(())
        }

        async fn list_days_after(&self, _identity: &RemoteIdentity, after: &str) -> Result<Vec<RemoteDayRow>, InfraError> {
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

    #[derive(Clone)]
    struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        fn at(value: &str) -> Self {
            let now = DateTime::parse_from_rfc3339(value)
                .expect("valid datetime")
                .with_timezone(&Utc);
            Self(Arc::new(Mutex::new(now)))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().expect("clock lock");
            *now += by;
        }

        fn provider(&self) -> NowProvider {
            let clock = Arc::clone(&self.0);
            Arc::new(move || *clock.lock().expect("clock lock"))
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date")
    }

    fn identity() -> RemoteIdentity {
        RemoteIdentity {
            user_id: "user-1".to_string(),
            access_token: "token".to_string(),
        }
    }

    fn test_config() -> PlannerConfig {
        let mut config = PlannerConfig::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 1;
        config
    }

    type TestPlanner = Planner<InMemoryDayStore, FakeRemoteClient>;

    fn planner(clock: &TestClock) -> (TestPlanner, Arc<InMemoryDayStore>, Arc<FakeRemoteClient>) {
        let local = Arc::new(InMemoryDayStore::default());
        let remote = Arc::new(FakeRemoteClient::default());
        let planner = Planner::new(test_config(), Arc::clone(&local), Some(Arc::clone(&remote)), monday())
            .expect("planner")
            .with_now_provider(clock.provider());
        (planner, local, remote)
    }

    fn workout() -> RoutineDraft {
        RoutineDraft {
            label: "Workout".to_string(),
            start_hour: 6,
            duration_hours: 1,
            pattern: RoutinePattern::Weekday,
        }
    }

    #[tokio::test]
    async fn edits_are_saved_locally_after_debounce() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, local, _) = planner(&clock);

        assert!(planner.set_planned(9, "Deep Work").expect("edit"));
        assert!(planner.set_planned(9, "Deep Work!").expect("edit"));
        assert!(planner.tick().await.expect("tick").is_empty());
        assert!(local.get("2026-02-16").expect("get").is_none());

        clock.advance(Duration::seconds(1));
        assert_eq!(planner.tick().await.expect("tick"), vec![SaveClass::Local]);
        let stored = local.get("2026-02-16").expect("get").expect("saved");
        assert_eq!(stored["slots"]["9"]["planned"], "Deep Work!");
        assert!(matches!(
            planner.save_status(SaveClass::Local).expect("status"),
            SaveStatus::Idle { last_saved_at: Some(_) }
        ));
    }

    #[tokio::test]
    async fn switching_days_flushes_the_outgoing_edit() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, local, _) = planner(&clock);

        planner.set_actual(3, "Sleep").expect("edit");
        let tuesday = NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date");
        planner.load_date(tuesday).await.expect("load");

        let stored = local.get("2026-02-16").expect("get").expect("flushed");
        assert_eq!(stored["slots"]["3"]["actual"], "Sleep");
        assert_eq!(planner.date().expect("date"), tuesday);
        assert!(planner.with_session(|session| session.grid().is_blank()).expect("session"));

        planner.load_date(monday()).await.expect("load");
        let actual = planner
            .with_session(|session| session.grid().slot(3).expect("slot").actual.clone())
            .expect("session");
        assert_eq!(actual, "Sleep");
    }

    #[tokio::test]
    async fn routines_fill_loaded_days_and_flag_rows() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, _, _) = planner(&clock);

        let routine = planner.upsert_routine(workout()).expect("routine");
        let rows = planner.row_render_models().expect("rows");
        assert_eq!(rows[6].planned, "Workout");
        assert_eq!(rows[6].routine_id.as_deref(), Some(routine.id.as_str()));

        let saturday = NaiveDate::from_ymd_opt(2026, 2, 21).expect("valid date");
        planner.load_date(saturday).await.expect("load");
        assert!(planner.with_session(|session| session.grid().is_blank()).expect("session"));

        assert_eq!(planner.pass_routine(&routine.id).expect("pass"), 0);
        planner.load_date(monday()).await.expect("load");
        assert_eq!(planner.pass_routine(&routine.id).expect("pass"), 1);
        assert!(planner.pass_routine("missing").is_err());
    }

    #[tokio::test]
    async fn plan_activities_extend_the_activity_catalog() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, _, _) = planner(&clock);

        planner
            .set_plan_activities(
                9,
                &[
                    ActivityItem::new("Write", 1800, ActivitySource::PlanTemplate),
                    ActivityItem::new("Read", 1200, ActivitySource::PlanTemplate),
                ],
            )
            .expect("plan");
        assert_eq!(
            planner.activity_catalog().expect("catalog").items,
            vec!["Write".to_string(), "Read".to_string()]
        );
        assert_eq!(planner.grid_units(9).expect("units").len(), 6);
        assert!(planner
            .set_plan_activities(9, &[ActivityItem::new(" ", 600, ActivitySource::Manual)])
            .is_err());
    }

    #[tokio::test]
    async fn signed_in_edits_reach_the_remote_once() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, _, remote) = planner(&clock);
        planner.sign_in(identity()).await.expect("sign in");

        planner.set_planned(9, "Deep Work").expect("edit");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");
        assert_eq!(remote.row("2026-02-16").expect("row")["slots"]["9"]["planned"], "Deep Work");

        let upserts = remote.upsert_calls.load(Ordering::SeqCst);
        planner.set_planned(9, "Other").expect("edit");
        planner.set_planned(9, "Deep Work").expect("edit");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");
        assert_eq!(remote.upsert_calls.load(Ordering::SeqCst), upserts);
        assert!(!planner.pending_remote_sync().expect("flag"));
    }

    #[tokio::test]
    async fn remote_failures_back_off_and_sign_out_clears_them() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, local, remote) = planner(&clock);
        planner.sign_in(identity()).await.expect("sign in");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");

        remote.fail_next("network error while upserting day");
        planner.set_planned(9, "Deep Work").expect("edit");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");
        assert!(matches!(
            planner.save_status(SaveClass::RemoteDay).expect("status"),
            SaveStatus::Error { .. }
        ));
        assert!(planner.pending_remote_sync().expect("flag"));
        assert!(local.get("2026-02-16").expect("get").is_some());

        planner.sign_out().expect("sign out");
        assert!(!planner.pending_remote_sync().expect("flag"));
        assert!(!planner.is_signed_in().expect("identity"));
        assert_eq!(planner.with_session(|s| s.grid().slot(9).expect("slot").planned.clone()).expect("session"), "Deep Work");
    }

    #[tokio::test]
    async fn realtime_changes_apply_once() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, _, remote) = planner(&clock);
        planner.sign_in(identity()).await.expect("sign in");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");

        remote.put("2026-02-16", json!({"slots": {"9": {"planned": "From phone"}}}));
        assert!(planner.on_realtime_change("2026-02-16").await.expect("apply"));
        assert!(!planner.on_realtime_change("2026-02-16").await.expect("apply"));
        assert!(!planner.on_realtime_change("2026-03-01").await.expect("other day"));
        let planned = planner
            .with_session(|session| session.grid().slot(9).expect("slot").planned.clone())
            .expect("session");
        assert_eq!(planned, "From phone");
    }

    #[tokio::test]
    async fn realtime_change_waits_for_an_unpushed_edit() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, _, remote) = planner(&clock);
        planner.sign_in(identity()).await.expect("sign in");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");

        planner.set_planned(10, "Mine").expect("edit");
        remote.put("2026-02-16", json!({"slots": {"9": {"planned": "From phone"}}}));
        assert!(!planner.on_realtime_change("2026-02-16").await.expect("apply"));
        let planned = planner
            .with_session(|session| session.grid().slot(10).expect("slot").planned.clone())
            .expect("session");
        assert_eq!(planned, "Mine");

        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");
        let row = remote.row("2026-02-16").expect("row");
        assert_eq!(row["slots"]["10"]["planned"], "Mine");
        assert!(row["slots"].get("9").is_none());
    }

    #[tokio::test]
    async fn failed_day_push_is_retried_after_switching_days() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, _, remote) = planner(&clock);
        planner.sign_in(identity()).await.expect("sign in");
        planner.set_planned(9, "A").expect("edit");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");
        assert_eq!(remote.row("2026-02-16").expect("row")["slots"]["9"]["planned"], "A");

        remote.fail_next("network error while upserting day");
        planner.set_planned(9, "B").expect("edit");
        let tuesday = NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date");
        planner.load_date(tuesday).await.expect("load");
        assert_eq!(remote.row("2026-02-16").expect("row")["slots"]["9"]["planned"], "A");

        for _ in 0..10 {
            clock.advance(Duration::seconds(1));
            planner.tick().await.expect("tick");
        }
        assert_eq!(remote.row("2026-02-16").expect("row")["slots"]["9"]["planned"], "B");
        assert!(remote.row("2026-02-17").is_none());

        planner.load_date(monday()).await.expect("load");
        let planned = planner
            .with_session(|session| session.grid().slot(9).expect("slot").planned.clone())
            .expect("session");
        assert_eq!(planned, "B");
    }

    #[tokio::test]
    async fn returning_to_an_unsynced_day_keeps_the_local_record() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, local, remote) = planner(&clock);
        planner.sign_in(identity()).await.expect("sign in");
        planner.set_planned(9, "A").expect("edit");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");

        remote.fail_next("network error while upserting day");
        remote.fail_next("network error while upserting day");
        planner.set_planned(9, "B").expect("edit");
        let tuesday = NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date");
        planner.load_date(tuesday).await.expect("load");
        planner.load_date(monday()).await.expect("load");

        let planned = planner
            .with_session(|session| session.grid().slot(9).expect("slot").planned.clone())
            .expect("session");
        assert_eq!(planned, "B");
        let stored = local.get("2026-02-16").expect("get").expect("saved");
        assert_eq!(stored["slots"]["9"]["planned"], "B");
        assert_eq!(remote.row("2026-02-16").expect("row")["slots"]["9"]["planned"], "A");

        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");
        assert_eq!(remote.row("2026-02-16").expect("row")["slots"]["9"]["planned"], "B");
    }

    #[tokio::test]
    async fn edit_landing_during_day_switch_is_kept() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, local, remote) = planner(&clock);
        let planner = Arc::new(planner);
        planner.sign_in(identity()).await.expect("sign in");
        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");

        let editor = Arc::clone(&planner);
        remote.on_next_fetch(move || {
            editor.set_planned(9, "Late edit").expect("edit");
        });
        let tuesday = NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date");
        planner.load_date(tuesday).await.expect("load");

        assert_eq!(planner.date().expect("date"), tuesday);
        let stored = local.get("2026-02-16").expect("get").expect("saved");
        assert_eq!(stored["slots"]["9"]["planned"], "Late edit");

        clock.advance(Duration::seconds(3));
        planner.tick().await.expect("tick");
        assert_eq!(remote.row("2026-02-16").expect("row")["slots"]["9"]["planned"], "Late edit");
    }

    #[tokio::test]
    async fn stopping_a_routine_sweeps_later_days_then_evicts() {
        let clock = TestClock::at("2026-02-16T05:00:00Z");
        let (planner, _, remote) = planner(&clock);
        planner.sign_in(identity()).await.expect("sign in");
        let routine = planner.upsert_routine(workout()).expect("routine");
        remote.put("2026-02-17", json!({"slots": {"6": {"planned": "Workout"}}}));

        let report = planner.stop_routine(&routine.id).await.expect("stop");
        assert_eq!(report.days_updated, 1);
        assert!(remote.row("2026-02-17").is_none());
        assert!(planner.routines().expect("routines").items.is_empty());
        let rows = planner.row_render_models().expect("rows");
        assert_eq!(rows[6].planned, "");
        assert!(planner.stop_routine(&routine.id).await.is_err());
    }

    #[tokio::test]
    async fn open_persists_through_sqlite_workspace() {
        let workspace = TempWorkspace::new();
        let bootstrap = bootstrap_workspace(&workspace.path).expect("bootstrap");

        let planner = Planner::open(&bootstrap, None, monday()).expect("open");
        planner.set_plan_title(9, "Focus", true).expect("edit");
        planner.flush().await.expect("flush");
        assert!(planner.sign_in(identity()).await.is_err());

        let reopened = Planner::open(&bootstrap, None, monday()).expect("reopen");
        let title = reopened
            .with_session(|session| session.grid().slot(9).expect("slot").plan_title.clone())
            .expect("session");
        assert_eq!(title, "Focus");
    }
}
