use crate::domain::decomposer::{
    consolidate, derive_text, distribute_activities, plan_unit_labels, plan_vocabulary,
    refresh_unit_flags,
};
use crate::domain::models::{MergeChannel, SLOTS_PER_DAY, TimeSlot};
use crate::domain::slot_grid::SlotGrid;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeKey {
    pub channel: MergeChannel,
    pub start: usize,
    pub end: usize,
}

impl MergeKey {
    pub fn new(channel: MergeChannel, start: usize, end: usize) -> Option<Self> {
        (start < end && end < SLOTS_PER_DAY).then_some(Self {
            channel,
            start,
            end,
        })
    }

    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let channel = MergeChannel::parse(parts.next()?)?;
        let start = parts.next()?.parse::<usize>().ok()?;
        let end = parts.next()?.parse::<usize>().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Self::new(channel, start, end)
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start <= end && start <= self.end
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.channel.as_str(), self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRange {
    pub key: MergeKey,
    pub value: String,
}

// Per-channel interval index. Ranges of one channel never share an index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeRegistry {
    planned: BTreeMap<usize, MergeRange>,
    actual: BTreeMap<usize, MergeRange>,
    time: BTreeMap<usize, MergeRange>,
}

impl MergeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, channel: MergeChannel) -> &BTreeMap<usize, MergeRange> {
        match channel {
            MergeChannel::Planned => &self.planned,
            MergeChannel::Actual => &self.actual,
            MergeChannel::Time => &self.time,
        }
    }

    fn index_mut(&mut self, channel: MergeChannel) -> &mut BTreeMap<usize, MergeRange> {
        match channel {
            MergeChannel::Planned => &mut self.planned,
            MergeChannel::Actual => &mut self.actual,
            MergeChannel::Time => &mut self.time,
        }
    }

    pub fn find_covering_range(&self, channel: MergeChannel, index: usize) -> Option<&MergeRange> {
        self.index(channel)
            .range(..=index)
            .next_back()
            .map(|(_, range)| range)
            .filter(|range| range.key.contains(index))
    }

    pub fn get(&self, key: &MergeKey) -> Option<&MergeRange> {
        self.index(key.channel)
            .get(&key.start)
            .filter(|range| range.key == *key)
    }

    pub fn ranges(&self, channel: MergeChannel) -> impl Iterator<Item = &MergeRange> {
        self.index(channel).values()
    }

    pub fn ranges_overlapping(&self, channel: MergeChannel, start: usize, end: usize) -> Vec<MergeKey> {
        self.index(channel)
            .values()
            .filter(|range| range.key.overlaps(start, end))
            .map(|range| range.key)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.planned.is_empty() && self.actual.is_empty() && self.time.is_empty()
    }

    pub fn insert(&mut self, key: MergeKey, value: impl Into<String>) -> Option<MergeKey> {
        if !self.ranges_overlapping(key.channel, key.start, key.end).is_empty() {
            return None;
        }
        self.index_mut(key.channel).insert(
            key.start,
            MergeRange {
                key,
                value: value.into(),
            },
        );
        Some(key)
    }

    pub fn remove(&mut self, key: &MergeKey) -> Option<MergeRange> {
        self.get(key)?;
        self.index_mut(key.channel).remove(&key.start)
    }

    pub fn set_value(&mut self, key: &MergeKey, value: impl Into<String>) -> bool {
        match self.index_mut(key.channel).get_mut(&key.start) {
            Some(range) if range.key == *key => {
                range.value = value.into();
                true
            }
            _ => false,
        }
    }

    pub fn block_bounds(&self, channel: MergeChannel, index: usize) -> (usize, usize) {
        self.find_covering_range(channel, index)
            .map(|range| (range.key.start, range.key.end))
            .unwrap_or((index, index))
    }

    pub fn block_hours(&self, index: usize) -> usize {
        let (start, end) = self.block_bounds(MergeChannel::Planned, index);
        end - start + 1
    }

    pub fn keys(&self) -> Vec<MergeKey> {
        MergeChannel::ALL
            .iter()
            .flat_map(|channel| self.ranges(*channel).map(|range| range.key))
            .collect()
    }
}

pub fn planned_text(grid: &SlotGrid, merges: &MergeRegistry, index: usize) -> String {
    match merges.find_covering_range(MergeChannel::Planned, index) {
        Some(range) => range.value.clone(),
        None => grid
            .slot(index)
            .map(|slot| slot.planned.clone())
            .unwrap_or_default(),
    }
}

pub fn actual_text(grid: &SlotGrid, merges: &MergeRegistry, index: usize) -> String {
    match merges.find_covering_range(MergeChannel::Actual, index) {
        Some(range) => range.value.clone(),
        None => grid
            .slot(index)
            .map(|slot| slot.actual.clone())
            .unwrap_or_default(),
    }
}

pub fn refresh_block_units(slot: &mut TimeSlot, block_label: &str, hours: usize) {
    let labels = plan_unit_labels(&slot.plan_activities, Some(block_label), hours);
    let vocabulary = plan_vocabulary(&slot.plan_activities, Some(block_label));
    refresh_unit_flags(&mut slot.activity_log, &labels, &vocabulary);
}

pub fn create_merge(
    grid: &mut SlotGrid,
    merges: &mut MergeRegistry,
    channel: MergeChannel,
    start: usize,
    end: usize,
    value: &str,
) -> Option<MergeKey> {
    let key = MergeKey::new(channel, start, end).filter(|key| key.end < grid.len())?;
    if !merges.ranges_overlapping(channel, start, end).is_empty() {
        return None;
    }

    match channel {
        MergeChannel::Planned => {
            let seeded_actual = actual_text(grid, merges, start);
            let value = if value.trim().is_empty() {
                planned_text(grid, merges, start)
            } else {
                value.trim().to_string()
            };
            consolidate_onto_head(grid, start, end);
            merges.insert(key, value.clone())?;

            for coupled in [MergeChannel::Time, MergeChannel::Actual] {
                for existing in merges.ranges_overlapping(coupled, start, end) {
                    if let Some(removed) = merges.remove(&existing) {
                        if coupled == MergeChannel::Actual {
                            restore_actual_head(grid, &removed);
                        }
                    }
                }
            }
            if let Some(time_key) = MergeKey::new(MergeChannel::Time, start, end) {
                merges.insert(time_key, String::new());
            }
            if let Some(actual_key) = MergeKey::new(MergeChannel::Actual, start, end) {
                merges.insert(actual_key, seeded_actual);
                if let Some(head) = grid.slot_mut(start) {
                    head.actual.clear();
                }
            }
            if let Some(head) = grid.slot_mut(start) {
                refresh_block_units(head, &value, key.len());
            }
        }
        MergeChannel::Actual => {
            let value = if value.trim().is_empty() {
                actual_text(grid, merges, start)
            } else {
                value.trim().to_string()
            };
            merges.insert(key, value)?;
            if let Some(head) = grid.slot_mut(start) {
                head.actual.clear();
            }
        }
        MergeChannel::Time => {
            merges.insert(key, value.trim())?;
        }
    }
    Some(key)
}

fn consolidate_onto_head(grid: &mut SlotGrid, start: usize, end: usize) {
    let slots = grid.slots_mut();
    let mut plan = Vec::new();
    let mut actual = Vec::new();
    for slot in &mut slots[start..=end] {
        plan.append(&mut slot.plan_activities);
        actual.append(&mut slot.activity_log.sub_activities);
        slot.planned.clear();
        slot.activity_log.actual_grid_units.clear();
        slot.activity_log.actual_extra_grid_units.clear();
    }
    let head = &mut slots[start];
    head.plan_activities = consolidate(&plan);
    head.activity_log.sub_activities = consolidate(&actual);
}

pub fn remove_merge(grid: &mut SlotGrid, merges: &mut MergeRegistry, key: &MergeKey) -> bool {
    let Some(range) = merges.remove(key) else {
        return false;
    };

    match key.channel {
        MergeChannel::Planned => {
            redistribute_planned(grid, &range);
            for coupled in [MergeChannel::Time, MergeChannel::Actual] {
                if let Some(coupled_key) = MergeKey::new(coupled, key.start, key.end) {
                    if let Some(removed) = merges.remove(&coupled_key) {
                        if coupled == MergeChannel::Actual {
                            restore_actual_head(grid, &removed);
                        }
                    }
                }
            }
        }
        MergeChannel::Actual => restore_actual_head(grid, &range),
        MergeChannel::Time => {}
    }
    true
}

fn restore_actual_head(grid: &mut SlotGrid, range: &MergeRange) {
    if let Some(head) = grid.slot_mut(range.key.start) {
        if head.actual.trim().is_empty() {
            head.actual = range.value.clone();
        }
    }
}

fn redistribute_planned(grid: &mut SlotGrid, range: &MergeRange) {
    let start = range.key.start;
    let parts = range.key.len();
    let slots = grid.slots_mut();

    let plan_shares = distribute_activities(&slots[start].plan_activities, parts);
    let actual_shares = distribute_activities(&slots[start].activity_log.sub_activities, parts);
    let any_plan = plan_shares.iter().any(|share| !share.is_empty());

    for (offset, (plan, actual)) in plan_shares.into_iter().zip(actual_shares).enumerate() {
        let slot = &mut slots[start + offset];
        slot.planned = if !any_plan {
            if offset == 0 {
                range.value.clone()
            } else {
                String::new()
            }
        } else if plan.is_empty() {
            range.value.clone()
        } else {
            derive_text(&plan)
        };
        slot.plan_activities = plan;
        slot.activity_log.sub_activities = actual;
        let label = slot.planned.clone();
        refresh_block_units(slot, &label, 1);
    }
}
