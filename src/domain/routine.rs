use crate::domain::merge_registry::{MergeRegistry, planned_text, remove_merge};
use crate::domain::models::{MergeChannel, Routine, RoutinePattern, SLOTS_PER_DAY};
use crate::domain::slot_grid::SlotGrid;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ROUTINE_ID: AtomicU64 = AtomicU64::new(1);

fn next_routine_id(now: DateTime<Utc>) -> String {
    let sequence = NEXT_ROUTINE_ID.fetch_add(1, Ordering::Relaxed);
    format!("rtn-{}-{sequence}", now.timestamp_micros())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineState {
    InactiveForPattern,
    Active,
    Passed,
    Stopped,
}

pub fn state_at(routine: &Routine, date: NaiveDate, slot_start: DateTime<Utc>) -> RoutineState {
    if !routine.pattern.matches(date.weekday()) {
        return RoutineState::InactiveForPattern;
    }
    if routine.is_passed_on(date) {
        return RoutineState::Passed;
    }
    match routine.stopped_at_ms {
        Some(stopped_at) if slot_start.timestamp_millis() >= stopped_at => RoutineState::Stopped,
        _ => RoutineState::Active,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineDraft {
    pub label: String,
    pub start_hour: u8,
    pub duration_hours: u8,
    pub pattern: RoutinePattern,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutinePatch {
    pub label: Option<String>,
    pub start_hour: Option<u8>,
    pub duration_hours: Option<u8>,
    pub pattern: Option<RoutinePattern>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSweep {
    pub routine_id: String,
    pub label: String,
    pub hours: Vec<u8>,
    pub after: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineCatalog {
    pub version: u64,
    pub items: Vec<Routine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl RoutineCatalog {
    fn touch(&mut self, now: DateTime<Utc>, actor: Option<&str>) {
        self.version += 1;
        self.updated_at = Some(now);
        self.updated_by = actor.map(ToOwned::to_owned);
    }

    pub fn get(&self, id: &str) -> Option<&Routine> {
        self.items.iter().find(|routine| routine.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Routine> {
        self.items.iter_mut().find(|routine| routine.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Routine> {
        self.items.iter().filter(|routine| !routine.is_stopped())
    }

    pub fn upsert_by_window(
        &mut self,
        draft: RoutineDraft,
        now: DateTime<Utc>,
        actor: Option<&str>,
    ) -> Result<Routine, String> {
        let existing = self
            .items
            .iter()
            .position(|routine| {
                !routine.is_stopped() && routine.same_window(draft.start_hour, draft.duration_hours)
            });

        let routine = match existing {
            Some(position) => {
                let mut updated = self.items[position].clone();
                updated.label = draft.label.trim().to_string();
                updated.pattern = draft.pattern;
                updated.updated_at = now;
                updated.updated_by = actor.map(ToOwned::to_owned);
                updated.validate()?;
                self.items[position] = updated.clone();
                updated
            }
            None => {
                let created = Routine {
                    id: next_routine_id(now),
                    label: draft.label.trim().to_string(),
                    start_hour: draft.start_hour,
                    duration_hours: draft.duration_hours,
                    pattern: draft.pattern,
                    pass_dates: Vec::new(),
                    stopped_at_ms: None,
                    created_at: now,
                    updated_at: now,
                    updated_by: actor.map(ToOwned::to_owned),
                };
                created.validate()?;
                self.items.push(created.clone());
                created
            }
        };
        self.touch(now, actor);
        Ok(routine)
    }

    pub fn update(
        &mut self,
        id: &str,
        patch: RoutinePatch,
        now: DateTime<Utc>,
        actor: Option<&str>,
    ) -> Result<Routine, String> {
        let routine = self
            .get_mut(id)
            .ok_or_else(|| format!("routine not found: {id}"))?;
        let mut updated = routine.clone();
        if let Some(label) = patch.label {
            updated.label = label.trim().to_string();
        }
        if let Some(start_hour) = patch.start_hour {
            updated.start_hour = start_hour;
        }
        if let Some(duration_hours) = patch.duration_hours {
            updated.duration_hours = duration_hours;
        }
        if let Some(pattern) = patch.pattern {
            updated.pattern = pattern;
        }
        updated.updated_at = now;
        updated.updated_by = actor.map(ToOwned::to_owned);
        updated.validate()?;
        *routine = updated.clone();
        self.touch(now, actor);
        Ok(updated)
    }

    pub fn mark_passed(
        &mut self,
        id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
        actor: Option<&str>,
    ) -> Option<Routine> {
        let routine = self.get_mut(id)?;
        if !routine.is_passed_on(date) {
            routine.pass_dates.push(date.to_string());
            routine.pass_dates.sort();
        }
        routine.updated_at = now;
        let passed = routine.clone();
        self.touch(now, actor);
        Some(passed)
    }

    pub fn mark_stopped(&mut self, id: &str, now: DateTime<Utc>, actor: Option<&str>) -> Option<Routine> {
        let routine = self.get_mut(id)?;
        if routine.stopped_at_ms.is_none() {
            routine.stopped_at_ms = Some(now.timestamp_millis());
        }
        routine.updated_at = now;
        let stopped = routine.clone();
        self.touch(now, actor);
        Some(stopped)
    }

    pub fn evict(&mut self, id: &str, now: DateTime<Utc>, actor: Option<&str>) -> Option<Routine> {
        let position = self
            .items
            .iter()
            .position(|routine| routine.id == id && routine.is_stopped())?;
        let evicted = self.items.remove(position);
        self.touch(now, actor);
        Some(evicted)
    }
}

// Grid indices of a routine's window. Windows running past the last slot
// of the logical day are cut at the grid's end.
pub fn window_indices(grid: &SlotGrid, routine: &Routine) -> Vec<usize> {
    let Some(first) = grid.index_for_hour(routine.start_hour) else {
        return Vec::new();
    };
    (first..first + routine.duration_hours as usize)
        .take_while(|index| *index < SLOTS_PER_DAY)
        .collect()
}

fn is_fillable(grid: &SlotGrid, merges: &MergeRegistry, index: usize) -> bool {
    let merged = MergeChannel::ALL
        .iter()
        .any(|channel| merges.find_covering_range(*channel, index).is_some());
    !merged
        && grid
            .slot(index)
            .is_some_and(|slot| !slot.has_planned_content() && !slot.plan_title_band_on)
}

pub fn apply_routines_to_date(
    grid: &mut SlotGrid,
    merges: &MergeRegistry,
    catalog: &RoutineCatalog,
    date: NaiveDate,
    tz: Tz,
) -> usize {
    let mut written = 0;
    for routine in &catalog.items {
        for index in window_indices(grid, routine) {
            let Some(slot_start) = grid.slot_start(date, index, tz) else {
                continue;
            };
            if state_at(routine, date, slot_start) != RoutineState::Active {
                continue;
            }
            if !is_fillable(grid, merges, index) {
                continue;
            }
            if let Some(slot) = grid.slot_mut(index) {
                slot.planned = routine.label.clone();
                written += 1;
            }
        }
    }
    written
}

pub fn routine_matches<'a>(
    grid: &SlotGrid,
    merges: &MergeRegistry,
    catalog: &'a RoutineCatalog,
    date: NaiveDate,
    index: usize,
) -> Option<&'a Routine> {
    let text = planned_text(grid, merges, index);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    catalog.active().find(|routine| {
        routine.label == text
            && routine.pattern.matches(date.weekday())
            && !routine.is_passed_on(date)
            && window_indices(grid, routine).contains(&index)
    })
}

fn clear_window(
    grid: &mut SlotGrid,
    merges: &mut MergeRegistry,
    routine: &Routine,
    indices: &[usize],
) -> usize {
    let mut cleared = 0;
    for &index in indices {
        if let Some(range) = merges.find_covering_range(MergeChannel::Planned, index) {
            if range.value.trim() != routine.label {
                continue;
            }
            let key = range.key;
            remove_merge(grid, merges, &key);
        }
        if let Some(slot) = grid.slot_mut(index) {
            if slot.planned.trim() == routine.label {
                slot.clear_planned();
                cleared += 1;
            }
        }
    }
    cleared
}

pub fn pass_routine(
    grid: &mut SlotGrid,
    merges: &mut MergeRegistry,
    catalog: &mut RoutineCatalog,
    id: &str,
    date: NaiveDate,
    now: DateTime<Utc>,
    actor: Option<&str>,
) -> Option<usize> {
    let routine = catalog.mark_passed(id, date, now, actor)?;
    let indices = window_indices(grid, &routine);
    Some(clear_window(grid, merges, &routine, &indices))
}

#[allow(clippy::too_many_arguments)]
pub fn stop_routine(
    grid: &mut SlotGrid,
    merges: &mut MergeRegistry,
    catalog: &mut RoutineCatalog,
    id: &str,
    date: NaiveDate,
    tz: Tz,
    now: DateTime<Utc>,
    actor: Option<&str>,
) -> Option<StopSweep> {
    let routine = catalog.mark_stopped(id, now, actor)?;
    let indices = window_indices(grid, &routine)
        .into_iter()
        .filter(|index| {
            grid.slot_start(date, *index, tz)
                .is_some_and(|slot_start| slot_start >= now)
        })
        .collect::<Vec<_>>();
    clear_window(grid, merges, &routine, &indices);

    Some(StopSweep {
        routine_id: routine.id.clone(),
        label: routine.label.clone(),
        hours: routine.hours().collect(),
        after: date,
    })
}
