use crate::infrastructure::config::{DebounceConfig, RetryConfig};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SaveClass {
    Local,
    RemoteDay,
    RemoteCatalog,
    RemoteRoutines,
}

impl SaveClass {
    pub const ALL: [SaveClass; 4] = [
        Self::Local,
        Self::RemoteDay,
        Self::RemoteCatalog,
        Self::RemoteRoutines,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::RemoteDay => "remote-day",
            Self::RemoteCatalog => "remote-catalog",
            Self::RemoteRoutines => "remote-routines",
        }
    }

    pub fn is_remote(self) -> bool {
        self != Self::Local
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Idle {
        last_saved_at: Option<DateTime<Utc>>,
    },
    Pending {
        since: DateTime<Utc>,
    },
    Error {
        message: String,
        occurred_at: DateTime<Utc>,
    },
}

// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
// capped at `max`.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::zero();
    }
    let factor = 1_u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let delay = base_ms.saturating_mul(factor).min(max_ms);
    Duration::milliseconds(i64::try_from(delay).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledSave {
    due_at: DateTime<Utc>,
    since: DateTime<Utc>,
    failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SaveFailure {
    message: String,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SaveScheduler {
    debounce: DebounceConfig,
    retry: RetryConfig,
    scheduled: BTreeMap<SaveClass, ScheduledSave>,
    in_flight: BTreeMap<SaveClass, ScheduledSave>,
    last_saved: BTreeMap<SaveClass, DateTime<Utc>>,
    last_error: BTreeMap<SaveClass, SaveFailure>,
    pending_remote_sync: bool,
}

impl SaveScheduler {
    pub fn new(debounce: DebounceConfig, retry: RetryConfig) -> Self {
        Self {
            debounce,
            retry,
            scheduled: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            last_saved: BTreeMap::new(),
            last_error: BTreeMap::new(),
            pending_remote_sync: false,
        }
    }

    fn debounce_for(&self, class: SaveClass) -> Duration {
        let millis = match class {
            SaveClass::Local => self.debounce.local_ms,
            SaveClass::RemoteDay => self.debounce.remote_day_ms,
            SaveClass::RemoteCatalog => self.debounce.remote_catalog_ms,
            SaveClass::RemoteRoutines => self.debounce.remote_routines_ms,
        };
        Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    pub fn schedule(&mut self, class: SaveClass, now: DateTime<Utc>) {
        let since = self
            .scheduled
            .get(&class)
            .map(|task| task.since)
            .unwrap_or(now);
        self.scheduled.insert(
            class,
            ScheduledSave {
                due_at: now + self.debounce_for(class),
                since,
                failures: 0,
            },
        );
        if class.is_remote() {
            self.pending_remote_sync = true;
        }
    }

    pub fn is_scheduled(&self, class: SaveClass) -> bool {
        self.scheduled.contains_key(&class)
    }

    pub fn is_outstanding(&self, class: SaveClass) -> bool {
        self.scheduled.contains_key(&class)
            || self.in_flight.contains_key(&class)
            || self.last_error.contains_key(&class)
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.scheduled.values().map(|task| task.due_at).min()
    }

    fn take(&mut self, classes: Vec<SaveClass>) -> Vec<SaveClass> {
        for class in &classes {
            if let Some(task) = self.scheduled.remove(class) {
                self.in_flight.insert(*class, task);
            }
        }
        classes
    }

    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<SaveClass> {
        let due = self
            .scheduled
            .iter()
            .filter(|(_, task)| task.due_at <= now)
            .map(|(class, _)| *class)
            .collect();
        self.take(due)
    }

    pub fn flush_all(&mut self) -> Vec<SaveClass> {
        let all = self.scheduled.keys().copied().collect();
        self.take(all)
    }

    pub fn mark_saved(&mut self, class: SaveClass, now: DateTime<Utc>) {
        self.in_flight.remove(&class);
        self.last_error.remove(&class);
        self.last_saved.insert(class, now);
        self.refresh_remote_flag();
    }

    pub fn mark_failed(
        &mut self,
        class: SaveClass,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let task = self.in_flight.remove(&class);
        self.last_error.insert(
            class,
            SaveFailure {
                message: message.into(),
                occurred_at: now,
            },
        );
        if let Some(newer) = self.scheduled.get(&class) {
            return Some(newer.due_at);
        }

        let task = task?;
        let failures = task.failures + 1;
        if failures >= u32::from(self.retry.max_attempts) {
            return None;
        }
        let due_at = now + backoff_delay(failures, self.retry.base_delay_ms, self.retry.max_delay_ms);
        self.scheduled.insert(
            class,
            ScheduledSave {
                due_at,
                since: task.since,
                failures,
            },
        );
        Some(due_at)
    }

    fn refresh_remote_flag(&mut self) {
        let outstanding = |class: &SaveClass| class.is_remote();
        self.pending_remote_sync = self.scheduled.keys().any(outstanding)
            || self.in_flight.keys().any(outstanding)
            || self.last_error.keys().any(outstanding);
    }

    pub fn cancel_remote(&mut self) {
        self.scheduled.retain(|class, _| !class.is_remote());
        self.in_flight.retain(|class, _| !class.is_remote());
        self.last_error.retain(|class, _| !class.is_remote());
        self.pending_remote_sync = false;
    }

    pub fn resume_remote(&mut self, now: DateTime<Utc>) -> Vec<SaveClass> {
        if !self.pending_remote_sync {
            return Vec::new();
        }
        let owed = self
            .last_error
            .keys()
            .copied()
            .filter(|class| class.is_remote() && !self.scheduled.contains_key(class))
            .collect::<Vec<_>>();
        for class in &owed {
            self.schedule(*class, now);
        }
        owed
    }

    pub fn pending_remote_sync(&self) -> bool {
        self.pending_remote_sync
    }

    pub fn status(&self, class: SaveClass) -> SaveStatus {
        if let Some(failure) = self.last_error.get(&class) {
            return SaveStatus::Error {
                message: failure.message.clone(),
                occurred_at: failure.occurred_at,
            };
        }
        if let Some(task) = self.scheduled.get(&class).or_else(|| self.in_flight.get(&class)) {
            return SaveStatus::Pending { since: task.since };
        }
        SaveStatus::Idle {
            last_saved_at: self.last_saved.get(&class).copied(),
        }
    }
}
