use crate::domain::models::{
    ActivityItem, ActivityLog, ActivitySource, GRID_UNIT_SECONDS, UNITS_PER_HOUR,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActualMode {
    Grid,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridUnit {
    pub label: Option<String>,
    pub active: bool,
    pub extra_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverrideLayout {
    pub plan_active: Vec<bool>,
    pub extra_units: Vec<Option<String>>,
    // Extra seconds that found no spare unit. They are reported, not stored.
    pub unassigned_seconds: u64,
}

pub fn floor_to_unit(seconds: u64) -> u64 {
    seconds - seconds % GRID_UNIT_SECONDS
}

pub fn units_for(seconds: u64) -> usize {
    seconds.div_ceil(GRID_UNIT_SECONDS) as usize
}

pub fn block_unit_count(hours: usize) -> usize {
    hours * UNITS_PER_HOUR
}

pub fn normalize_activities(items: &[ActivityItem]) -> Vec<ActivityItem> {
    items
        .iter()
        .filter(|item| !item.label.trim().is_empty())
        .map(|item| {
            let mut normalized = item.clone();
            normalized.label = item.label.trim().to_string();
            normalized.seconds = floor_to_unit(item.seconds);
            normalized.recorded_seconds = item.recorded_seconds.map(floor_to_unit);
            normalized
        })
        .filter(|item| item.seconds > 0 || item.recorded_seconds.unwrap_or(0) > 0)
        .collect()
}

pub fn consolidate(items: &[ActivityItem]) -> Vec<ActivityItem> {
    let mut merged: Vec<ActivityItem> = Vec::new();
    for item in items {
        match merged.iter_mut().find(|existing| existing.label == item.label) {
            Some(existing) => {
                existing.seconds += item.seconds;
                existing.recorded_seconds = match (existing.recorded_seconds, item.recorded_seconds) {
                    (None, None) => None,
                    (left, right) => Some(left.unwrap_or(0) + right.unwrap_or(0)),
                };
            }
            None => merged.push(item.clone()),
        }
    }
    merged
}

pub fn plan_vocabulary(plan: &[ActivityItem], fallback_label: Option<&str>) -> Vec<String> {
    let mut vocabulary: Vec<String> = Vec::new();
    for item in plan {
        let label = item.label.trim();
        if !label.is_empty() && !vocabulary.iter().any(|known| known == label) {
            vocabulary.push(label.to_string());
        }
    }
    if vocabulary.is_empty() {
        if let Some(label) = fallback_label.map(str::trim).filter(|label| !label.is_empty()) {
            vocabulary.push(label.to_string());
        }
    }
    vocabulary
}

pub fn plan_unit_labels(
    plan: &[ActivityItem],
    fallback_label: Option<&str>,
    hours: usize,
) -> Vec<Option<String>> {
    let total = block_unit_count(hours);
    let plan = normalize_activities(plan);
    if plan.is_empty() {
        let fill = fallback_label
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(ToOwned::to_owned);
        return vec![fill; total];
    }

    let mut labels = Vec::with_capacity(total);
    for item in &plan {
        for _ in 0..units_for(item.seconds) {
            if labels.len() == total {
                break;
            }
            labels.push(Some(item.label.clone()));
        }
    }
    labels.resize(total, None);
    labels
}

fn run_bounds(labels: &[Option<String>], unit: usize) -> (usize, usize) {
    let label = &labels[unit];
    let mut start = unit;
    while start > 0 && &labels[start - 1] == label {
        start -= 1;
    }
    let mut end = unit + 1;
    while end < labels.len() && &labels[end] == label {
        end += 1;
    }
    (start, end)
}

// Prefix toggle: clicking unit `k` of a run activates its first `k + 1`
// units, unless exactly `k + 1` are active already, which clears the run.
pub fn toggle_grid_unit(labels: &[Option<String>], active: &mut Vec<bool>, unit: usize) -> bool {
    if unit >= labels.len() || labels[unit].is_none() {
        return false;
    }
    active.resize(labels.len(), false);

    let (start, end) = run_bounds(labels, unit);
    let current = active[start..end].iter().filter(|value| **value).count();
    let target = unit - start + 1;
    let next = if target == current { 0 } else { target };
    for (offset, value) in active[start..end].iter_mut().enumerate() {
        *value = offset < next;
    }
    true
}

pub fn grid_to_activities(labels: &[Option<String>], active: &[bool]) -> Vec<ActivityItem> {
    let mut items: Vec<ActivityItem> = Vec::new();
    for (index, label) in labels.iter().enumerate() {
        let Some(label) = label else {
            continue;
        };
        let on = active.get(index).copied().unwrap_or(false);
        let position = match items.iter().position(|item| &item.label == label) {
            Some(position) => position,
            None => {
                items.push(ActivityItem::new(label.clone(), 0, ActivitySource::Grid));
                items.len() - 1
            }
        };
        if on {
            items[position].seconds += GRID_UNIT_SECONDS;
        }
    }
    items.retain(|item| item.seconds > 0);
    for item in &mut items {
        item.recorded_seconds = Some(item.seconds);
    }
    items
}

fn fill_label_runs(
    labels: &[Option<String>],
    items: &[ActivityItem],
    round_up: bool,
) -> Vec<bool> {
    let mut active = vec![false; labels.len()];
    for item in items {
        let realized = item.realized_seconds();
        let mut remaining = if round_up {
            units_for(realized)
        } else {
            (floor_to_unit(realized) / GRID_UNIT_SECONDS) as usize
        };
        for (index, label) in labels.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            if label.as_deref() == Some(item.label.as_str()) && !active[index] {
                active[index] = true;
                remaining -= 1;
            }
        }
    }
    active
}

pub fn activities_to_grid(labels: &[Option<String>], items: &[ActivityItem]) -> Vec<bool> {
    fill_label_runs(labels, items, false)
}

pub fn override_layout(
    labels: &[Option<String>],
    vocabulary: &[String],
    items: &[ActivityItem],
) -> OverrideLayout {
    let (plan_items, extra_items): (Vec<&ActivityItem>, Vec<&ActivityItem>) = items
        .iter()
        .partition(|item| vocabulary.iter().any(|label| label == &item.label));

    let plan_items = plan_items.into_iter().cloned().collect::<Vec<_>>();
    let plan_active = fill_label_runs(labels, &plan_items, true);

    let mut extra_units = vec![None; labels.len()];
    let mut spare = labels
        .iter()
        .enumerate()
        .filter(|(_, label)| label.is_none())
        .map(|(index, _)| index);
    let mut unassigned_seconds = 0;

    for item in extra_items {
        let realized = item.realized_seconds();
        if realized == 0 {
            continue;
        }
        let wanted = units_for(realized).max(1);
        let mut placed = 0;
        while placed < wanted {
            let Some(index) = spare.next() else {
                break;
            };
            extra_units[index] = Some(item.label.clone());
            placed += 1;
        }
        if placed < wanted {
            let placed_seconds = placed as u64 * GRID_UNIT_SECONDS;
            unassigned_seconds += realized.saturating_sub(placed_seconds);
        }
    }

    OverrideLayout {
        plan_active,
        extra_units,
        unassigned_seconds,
    }
}

pub fn actual_mode(log: &ActivityLog, vocabulary: &[String], items: &[ActivityItem]) -> ActualMode {
    let has_extra = items
        .iter()
        .any(|item| !vocabulary.iter().any(|label| label == &item.label));
    if log.actual_override || has_extra {
        ActualMode::Override
    } else {
        ActualMode::Grid
    }
}

pub fn record_actual_activities(
    log: &mut ActivityLog,
    labels: &[Option<String>],
    vocabulary: &[String],
    items: &[ActivityItem],
) -> u64 {
    let mut items = normalize_activities(items);
    for item in &mut items {
        let planned = vocabulary.iter().any(|label| label == &item.label);
        item.source = if planned {
            ActivitySource::Grid
        } else {
            ActivitySource::Extra
        };
    }

    match actual_mode(log, vocabulary, &items) {
        ActualMode::Grid => {
            let active = activities_to_grid(labels, &items);
            log.sub_activities = grid_to_activities(labels, &active);
            log.actual_grid_units = active;
            log.actual_extra_grid_units = vec![false; labels.len()];
            0
        }
        ActualMode::Override => {
            let layout = override_layout(labels, vocabulary, &items);
            log.actual_override = true;
            log.actual_grid_units = layout.plan_active;
            log.actual_extra_grid_units = layout.extra_units.iter().map(Option::is_some).collect();
            log.sub_activities = items;
            layout.unassigned_seconds
        }
    }
}

pub fn refresh_unit_flags(log: &mut ActivityLog, labels: &[Option<String>], vocabulary: &[String]) {
    match actual_mode(log, vocabulary, &log.sub_activities) {
        ActualMode::Grid => {
            log.actual_grid_units = activities_to_grid(labels, &log.sub_activities);
            log.actual_extra_grid_units = vec![false; labels.len()];
        }
        ActualMode::Override => {
            let layout = override_layout(labels, vocabulary, &log.sub_activities);
            log.actual_override = true;
            log.actual_grid_units = layout.plan_active;
            log.actual_extra_grid_units = layout.extra_units.iter().map(Option::is_some).collect();
        }
    }
}

pub fn toggle_actual_unit(
    log: &mut ActivityLog,
    labels: &[Option<String>],
    vocabulary: &[String],
    unit: usize,
) -> bool {
    let mut active = log.actual_grid_units.clone();
    if !toggle_grid_unit(labels, &mut active, unit) {
        return false;
    }
    let mut items = grid_to_activities(labels, &active);
    let extras = log
        .sub_activities
        .iter()
        .filter(|item| !vocabulary.iter().any(|label| label == &item.label))
        .cloned()
        .collect::<Vec<_>>();
    items.extend(extras);

    log.actual_grid_units = active;
    if log.actual_override {
        let layout = override_layout(labels, vocabulary, &items);
        log.actual_extra_grid_units = layout.extra_units.iter().map(Option::is_some).collect();
    }
    log.sub_activities = items;
    true
}

pub fn grid_units(
    labels: &[Option<String>],
    log: &ActivityLog,
    vocabulary: &[String],
) -> Vec<GridUnit> {
    let extras = if log.actual_override {
        override_layout(labels, vocabulary, &log.sub_activities).extra_units
    } else {
        vec![None; labels.len()]
    };
    labels
        .iter()
        .enumerate()
        .map(|(index, label)| GridUnit {
            label: label.clone(),
            active: log.actual_grid_units.get(index).copied().unwrap_or(false),
            extra_label: extras.get(index).cloned().flatten(),
        })
        .collect()
}

pub fn split_evenly(seconds: u64, parts: usize) -> Vec<u64> {
    if parts == 0 {
        return Vec::new();
    }
    let base = seconds / parts as u64;
    let remainder = (seconds % parts as u64) as usize;
    (0..parts)
        .map(|part| base + u64::from(part < remainder))
        .collect()
}

pub fn distribute_activities(items: &[ActivityItem], parts: usize) -> Vec<Vec<ActivityItem>> {
    let mut distributed = vec![Vec::new(); parts];
    for item in items {
        let seconds = split_evenly(item.seconds, parts);
        let recorded = item
            .recorded_seconds
            .map(|value| split_evenly(value, parts));
        for (part, share) in seconds.into_iter().enumerate() {
            let recorded_share = recorded.as_ref().map(|values| values[part]);
            if share == 0 && recorded_share.unwrap_or(0) == 0 {
                continue;
            }
            let mut piece = item.clone();
            piece.seconds = share;
            piece.recorded_seconds = recorded_share;
            distributed[part].push(piece);
        }
    }
    distributed
}

pub fn derive_text(items: &[ActivityItem]) -> String {
    let mut labels: Vec<&str> = Vec::new();
    for item in items {
        if !labels.contains(&item.label.as_str()) {
            labels.push(item.label.as_str());
        }
    }
    labels.join(", ")
}

pub fn total_seconds(items: &[ActivityItem]) -> u64 {
    items.iter().map(|item| item.seconds).sum()
}
