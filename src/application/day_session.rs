use crate::domain::balancer::{Adjustment, DurationBalancer};
use crate::domain::day_record::DayRecord;
use crate::domain::decomposer::{
    ActualMode, GridUnit, activities_to_grid, actual_mode, grid_to_activities, grid_units,
    normalize_activities, plan_unit_labels, plan_vocabulary, record_actual_activities,
    refresh_unit_flags, toggle_actual_unit,
};
use crate::domain::merge_registry::{
    MergeKey, MergeRegistry, actual_text, create_merge, planned_text, remove_merge,
};
use crate::domain::models::{ActivityItem, ActivitySource, MergeChannel, SECONDS_PER_HOUR};
use crate::domain::routine::{RoutineCatalog, apply_routines_to_date, routine_matches};
use crate::domain::slot_grid::{DayStartHour, SlotGrid};
use crate::domain::timer;
use crate::infrastructure::record_mapper::{decode_day_record, encode_day_record};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeMembership {
    pub channel: MergeChannel,
    pub key: String,
    pub is_head: bool,
    pub span: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRenderModel {
    pub index: usize,
    pub label: String,
    pub planned: String,
    pub actual: String,
    pub plan_title: String,
    pub plan_title_band_on: bool,
    pub details: String,
    pub merges: Vec<MergeMembership>,
    pub routine_id: Option<String>,
    pub timer_running: bool,
    pub timer_display: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySession {
    date: NaiveDate,
    grid: SlotGrid,
    merges: MergeRegistry,
}

impl DaySession {
    pub fn new(date: NaiveDate, day_start: DayStartHour) -> Self {
        Self {
            date,
            grid: SlotGrid::new(day_start),
            merges: MergeRegistry::new(),
        }
    }

    pub fn from_record(date: NaiveDate, record: &DayRecord, day_start: DayStartHour) -> Self {
        let (grid, merges) = decode_day_record(record, day_start);
        Self { date, grid, merges }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn day_key(&self) -> String {
        self.date.to_string()
    }

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    pub fn merges(&self) -> &MergeRegistry {
        &self.merges
    }

    pub fn to_record(&self) -> DayRecord {
        encode_day_record(&self.grid, &self.merges)
    }

    pub fn signature(&self) -> String {
        self.to_record().signature()
    }

    pub fn block_head(&self, index: usize) -> usize {
        self.merges.block_bounds(MergeChannel::Planned, index).0
    }

    fn block_label(&self, head: usize) -> String {
        let text = planned_text(&self.grid, &self.merges, head);
        let text = text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        self.grid
            .slot(head)
            .map(|slot| slot.plan_title.trim().to_string())
            .unwrap_or_default()
    }

    fn block_layout(&self, index: usize) -> Option<(usize, Vec<Option<String>>, Vec<String>)> {
        let head = self.block_head(index);
        let slot = self.grid.slot(head)?;
        let label = self.block_label(head);
        let fallback = (!label.is_empty()).then_some(label.as_str());
        let hours = self.merges.block_hours(head);
        Some((
            head,
            plan_unit_labels(&slot.plan_activities, fallback, hours),
            plan_vocabulary(&slot.plan_activities, fallback),
        ))
    }

    fn refresh_units(&mut self, index: usize) {
        let Some((head, labels, vocabulary)) = self.block_layout(index) else {
            return;
        };
        if let Some(slot) = self.grid.slot_mut(head) {
            refresh_unit_flags(&mut slot.activity_log, &labels, &vocabulary);
        }
    }

    pub fn set_planned(&mut self, index: usize, text: &str) -> bool {
        let text = text.trim();
        if let Some(range) = self.merges.find_covering_range(MergeChannel::Planned, index) {
            let key = range.key;
            if range.value == text {
                return false;
            }
            self.merges.set_value(&key, text);
        } else {
            let Some(slot) = self.grid.slot_mut(index) else {
                return false;
            };
            if slot.planned == text {
                return false;
            }
            slot.planned = text.to_string();
        }
        self.refresh_units(index);
        true
    }

    pub fn set_actual(&mut self, index: usize, text: &str) -> bool {
        let text = text.trim();
        if let Some(range) = self.merges.find_covering_range(MergeChannel::Actual, index) {
            let key = range.key;
            if range.value == text {
                return false;
            }
            return self.merges.set_value(&key, text);
        }
        match self.grid.slot_mut(index) {
            Some(slot) if slot.actual != text => {
                slot.actual = text.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn set_details(&mut self, index: usize, details: &str) -> bool {
        let head = self.block_head(index);
        match self.grid.slot_mut(head) {
            Some(slot) if slot.activity_log.details != details => {
                slot.activity_log.details = details.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn set_plan_title(&mut self, index: usize, title: &str, band_on: bool) -> bool {
        let head = self.block_head(index);
        let Some(slot) = self.grid.slot_mut(head) else {
            return false;
        };
        let title = title.trim();
        if slot.plan_title == title && slot.plan_title_band_on == band_on {
            return false;
        }
        slot.plan_title = title.to_string();
        slot.plan_title_band_on = band_on;
        self.refresh_units(head);
        true
    }

    pub fn set_actual_title_band(&mut self, index: usize, band_on: bool) -> bool {
        let head = self.block_head(index);
        match self.grid.slot_mut(head) {
            Some(slot) if slot.activity_log.title_band_on != band_on => {
                slot.activity_log.title_band_on = band_on;
                true
            }
            _ => false,
        }
    }

    pub fn set_plan_activities(&mut self, index: usize, items: &[ActivityItem]) -> Option<Vec<ActivityItem>> {
        let head = self.block_head(index);
        let mut normalized = normalize_activities(items);
        for (order, item) in normalized.iter_mut().enumerate() {
            item.order = Some(order as u32);
        }
        let slot = self.grid.slot_mut(head)?;
        slot.plan_activities = normalized.clone();
        self.refresh_units(head);
        Some(normalized)
    }

    pub fn edit_plan_activity_seconds(
        &mut self,
        index: usize,
        entry: usize,
        seconds: u64,
        step: u64,
    ) -> Option<Adjustment> {
        let head = self.block_head(index);
        let total = self.merges.block_hours(head) as u64 * SECONDS_PER_HOUR;
        let slot = self.grid.slot_mut(head)?;
        let mut entries = slot
            .plan_activities
            .iter()
            .map(|item| item.seconds)
            .collect::<Vec<_>>();
        let adjustment = DurationBalancer::hard_total(total, step).set(&mut entries, entry, seconds)?;
        for (item, value) in slot.plan_activities.iter_mut().zip(entries) {
            item.seconds = value;
        }
        self.refresh_units(head);
        Some(adjustment)
    }

    pub fn record_actual_activities(&mut self, index: usize, items: &[ActivityItem]) -> Option<u64> {
        let (head, labels, vocabulary) = self.block_layout(index)?;
        let slot = self.grid.slot_mut(head)?;
        Some(record_actual_activities(
            &mut slot.activity_log,
            &labels,
            &vocabulary,
            items,
        ))
    }

    pub fn edit_actual_activity_seconds(
        &mut self,
        index: usize,
        entry: usize,
        seconds: u64,
    ) -> Option<Adjustment> {
        let (head, labels, vocabulary) = self.block_layout(index)?;
        let slot = self.grid.slot_mut(head)?;
        let items = &mut slot.activity_log.sub_activities;
        let mut entries = items.iter().map(ActivityItem::realized_seconds).collect::<Vec<_>>();
        let adjustment = DurationBalancer::conserve_sum().set(&mut entries, entry, seconds)?;
        for (item, value) in items.iter_mut().zip(entries) {
            if item.source != ActivitySource::Extra {
                item.seconds = value;
            }
            item.recorded_seconds = Some(value);
        }
        // Grid mode stores only what the label's units can hold.
        if actual_mode(&slot.activity_log, &vocabulary, &slot.activity_log.sub_activities) == ActualMode::Grid {
            let active = activities_to_grid(&labels, &slot.activity_log.sub_activities);
            slot.activity_log.sub_activities = grid_to_activities(&labels, &active);
        }
        refresh_unit_flags(&mut slot.activity_log, &labels, &vocabulary);
        Some(adjustment)
    }

    pub fn toggle_actual_grid_unit(&mut self, index: usize, unit: usize) -> bool {
        let Some((head, labels, vocabulary)) = self.block_layout(index) else {
            return false;
        };
        self.grid
            .slot_mut(head)
            .is_some_and(|slot| toggle_actual_unit(&mut slot.activity_log, &labels, &vocabulary, unit))
    }

    pub fn grid_units(&self, index: usize) -> Vec<GridUnit> {
        let Some((head, labels, vocabulary)) = self.block_layout(index) else {
            return Vec::new();
        };
        self.grid
            .slot(head)
            .map(|slot| grid_units(&labels, &slot.activity_log, &vocabulary))
            .unwrap_or_default()
    }

    pub fn start_timer(&mut self, index: usize, now: DateTime<Utc>) -> Vec<usize> {
        timer::start_exclusive(self.grid.slots_mut(), index, now)
    }

    pub fn stop_timer(&mut self, index: usize, now: DateTime<Utc>) -> bool {
        timer::stop(self.grid.slots_mut(), index, now)
    }

    pub fn stop_all_timers(&mut self, now: DateTime<Utc>) -> Vec<usize> {
        timer::stop_all(self.grid.slots_mut(), now)
    }

    pub fn reset_timer(&mut self, index: usize) {
        timer::reset(self.grid.slots_mut(), index);
    }

    pub fn set_timer_text(&mut self, index: usize, text: &str) -> bool {
        self.grid
            .slot_mut(index)
            .is_some_and(|slot| slot.timer.apply_manual_text(text))
    }

    pub fn merge(&mut self, channel: MergeChannel, start: usize, end: usize, value: &str) -> Option<MergeKey> {
        create_merge(&mut self.grid, &mut self.merges, channel, start, end, value)
    }

    pub fn unmerge(&mut self, key: &MergeKey) -> bool {
        remove_merge(&mut self.grid, &mut self.merges, key)
    }

    pub fn apply_routines(&mut self, catalog: &RoutineCatalog, tz: Tz) -> usize {
        apply_routines_to_date(&mut self.grid, &self.merges, catalog, self.date, tz)
    }

    pub fn parts_mut(&mut self) -> (&mut SlotGrid, &mut MergeRegistry) {
        (&mut self.grid, &mut self.merges)
    }

    pub fn row_render_models(&self, catalog: &RoutineCatalog, now: DateTime<Utc>) -> Vec<RowRenderModel> {
        self.grid
            .slots()
            .iter()
            .map(|slot| {
                let head = self.block_head(slot.index);
                let merges = MergeChannel::ALL
                    .iter()
                    .filter_map(|channel| self.merges.find_covering_range(*channel, slot.index))
                    .map(|range| MergeMembership {
                        channel: range.key.channel,
                        key: range.key.to_string(),
                        is_head: range.key.start == slot.index,
                        span: range.key.len(),
                    })
                    .collect();
                let details = self
                    .grid
                    .slot(head)
                    .map(|owner| owner.activity_log.details.clone())
                    .unwrap_or_default();
                RowRenderModel {
                    index: slot.index,
                    label: slot.label.clone(),
                    planned: planned_text(&self.grid, &self.merges, slot.index),
                    actual: actual_text(&self.grid, &self.merges, slot.index),
                    plan_title: slot.plan_title.clone(),
                    plan_title_band_on: slot.plan_title_band_on,
                    details,
                    merges,
                    routine_id: routine_matches(&self.grid, &self.merges, catalog, self.date, slot.index)
                        .map(|routine| routine.id.clone()),
                    timer_running: slot.timer.running,
                    timer_display: slot.timer.display(now),
                }
            })
            .collect()
    }
}
