use crate::domain::day_record::{DayRecord, MergedRecord, MergedValue, SlotRecord, TimeRangeRecord};
use crate::domain::merge_registry::{MergeKey, MergeRegistry};
use crate::domain::models::MergeChannel;
use crate::domain::slot_grid::{DayStartHour, SlotGrid};

fn merged_value(grid: &SlotGrid, merges: &MergeRegistry, channel: MergeChannel, index: usize) -> Option<MergedValue> {
    let range = merges
        .find_covering_range(channel, index)
        .filter(|range| range.key.start == index)?;
    Some(MergedValue {
        end_hour: grid.hour_for_index(range.key.end)?,
        value: range.value.clone(),
    })
}

pub fn encode_day_record(grid: &SlotGrid, merges: &MergeRegistry) -> DayRecord {
    let mut record = DayRecord::default();
    for slot in grid.slots() {
        let Some(hour) = grid.hour_for_index(slot.index) else {
            continue;
        };
        let merged = MergedRecord {
            planned: merged_value(grid, merges, MergeChannel::Planned, slot.index),
            actual: merged_value(grid, merges, MergeChannel::Actual, slot.index),
        };
        let time_range = merges
            .find_covering_range(MergeChannel::Time, slot.index)
            .filter(|range| range.key.start == slot.index)
            .and_then(|range| grid.hour_for_index(range.key.end))
            .map(|end_hour| TimeRangeRecord { end_hour });

        let log = &slot.activity_log;
        let encoded = SlotRecord {
            planned: slot.planned.clone(),
            actual: slot.actual.clone(),
            details: log.details.clone(),
            activities: log.sub_activities.clone(),
            plan_activities: slot.plan_activities.clone(),
            plan_title: slot.plan_title.clone(),
            plan_title_band_on: slot.plan_title_band_on,
            actual_title_band_on: log.title_band_on,
            actual_grid_units: log.actual_grid_units.clone(),
            actual_extra_grid_units: log.actual_extra_grid_units.clone(),
            actual_override: log.actual_override,
            merged: (!merged.is_empty()).then_some(merged),
            time_range,
            timer: (!slot.timer.is_idle()).then(|| slot.timer.clone()),
        };
        if !encoded.is_empty() {
            record.slots.insert(hour.to_string(), encoded);
        }
    }
    record
}

fn restore_range(
    grid: &SlotGrid,
    merges: &mut MergeRegistry,
    channel: MergeChannel,
    start: usize,
    end_hour: u8,
    value: &str,
) {
    let restored = grid
        .index_for_hour(end_hour)
        .and_then(|end| MergeKey::new(channel, start, end))
        .and_then(|key| merges.insert(key, value));
    if restored.is_none() {
        tracing::warn!(
            channel = channel.as_str(),
            start,
            end_hour,
            "ignoring malformed merge descriptor"
        );
    }
}

pub fn decode_day_record(record: &DayRecord, day_start: DayStartHour) -> (SlotGrid, MergeRegistry) {
    let mut grid = SlotGrid::new(day_start);
    let mut merges = MergeRegistry::new();

    for (key, stored) in &record.slots {
        let Some(index) = key
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(|hour| grid.index_for_hour(hour))
        else {
            tracing::warn!(hour = key.as_str(), "ignoring slot with invalid hour key");
            continue;
        };
        if let Some(slot) = grid.slot_mut(index) {
            slot.planned = stored.planned.clone();
            slot.actual = stored.actual.clone();
            slot.plan_activities = stored.plan_activities.clone();
            slot.plan_title = stored.plan_title.clone();
            slot.plan_title_band_on = stored.plan_title_band_on;
            slot.activity_log.details = stored.details.clone();
            slot.activity_log.sub_activities = stored.activities.clone();
            slot.activity_log.title_band_on = stored.actual_title_band_on;
            slot.activity_log.actual_grid_units = stored.actual_grid_units.clone();
            slot.activity_log.actual_extra_grid_units = stored.actual_extra_grid_units.clone();
            slot.activity_log.actual_override = stored.actual_override;
            slot.timer = stored.timer.clone().unwrap_or_default();
        }

        if let Some(merged) = &stored.merged {
            if let Some(planned) = &merged.planned {
                restore_range(&grid, &mut merges, MergeChannel::Planned, index, planned.end_hour, &planned.value);
            }
            if let Some(actual) = &merged.actual {
                restore_range(&grid, &mut merges, MergeChannel::Actual, index, actual.end_hour, &actual.value);
            }
        }
        if let Some(time_range) = &stored.time_range {
            restore_range(&grid, &mut merges, MergeChannel::Time, index, time_range.end_hour, "");
        }
    }
    (grid, merges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::day_record::decode_day;
    use crate::domain::merge_registry::create_merge;
    use crate::domain::models::{ActivityItem, ActivitySource};
    use crate::domain::timer::start_exclusive;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn encode_and_decode_roundtrip_preserves_slots_and_merges() {
        let mut grid = SlotGrid::new(DayStartHour::Four);
        let mut merges = MergeRegistry::new();
        {
            let slot = grid.slot_mut(5).expect("slot");
            slot.plan_activities = vec![ActivityItem::new("Write", 1800, ActivitySource::Manual)];
            slot.activity_log.details = "draft intro".to_string();
        }
        grid.slot_mut(1).expect("slot").actual = "Stretch".to_string();
        create_merge(&mut grid, &mut merges, MergeChannel::Planned, 19, 21, "Late study")
            .expect("merge across midnight");
        start_exclusive(grid.slots_mut(), 2, fixed_time());

        let record = encode_day_record(&grid, &merges);
        assert_eq!(record.slot(23).expect("merged head").merged.as_ref().expect("merged")
            .planned.as_ref().expect("planned").end_hour, 1);
        let (decoded_grid, decoded_merges) = decode_day_record(&record, DayStartHour::Four);

        assert_eq!(decoded_grid, grid);
        assert_eq!(decoded_merges, merges);
        assert_eq!(encode_day_record(&decoded_grid, &decoded_merges), record);
    }

    #[test]
    fn blank_grid_encodes_to_empty_record() {
        let grid = SlotGrid::new(DayStartHour::Midnight);
        let record = encode_day_record(&grid, &MergeRegistry::new());
        assert!(record.slots.is_empty());
    }

    #[test]
    fn decode_skips_invalid_hours_and_malformed_merges() {
        let record = decode_day(&json!({
            "slots": {
                "25": {"planned": "Ghost"},
                "x": {"planned": "Ghost"},
                "8": {"planned": "Commute", "merged": {"planned": {"endHour": 7, "value": "Commute"}}},
                "9": {"planned": "Deep Work", "timeRange": {"endHour": 11}}
            }
        }))
        .expect("decode record");

        let (grid, merges) = decode_day_record(&record, DayStartHour::Midnight);
        assert_eq!(grid.slot(8).expect("slot").planned, "Commute");
        assert!(merges.find_covering_range(MergeChannel::Planned, 8).is_none());
        assert!(merges.find_covering_range(MergeChannel::Time, 10).is_some());
        assert_eq!(grid.slots().iter().filter(|slot| slot.planned == "Ghost").count(), 0);
    }
}
