use crate::domain::models::{ActivityCatalog, ActivityItem};
use crate::domain::routine::RoutineCatalog;
use crate::domain::timer::SlotTimer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const ACTIVITY_CATALOG_DAY: &str = "catalog:activities";
pub const ROUTINE_CATALOG_DAY: &str = "catalog:routines";

pub fn is_sentinel_day(day: &str) -> bool {
    day == ACTIVITY_CATALOG_DAY || day == ROUTINE_CATALOG_DAY
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn no_active_units(units: &[bool]) -> bool {
    !units.iter().any(|unit| *unit)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergedValue {
    pub end_hour: u8,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MergedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned: Option<MergedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<MergedValue>,
}

impl MergedRecord {
    pub fn is_empty(&self) -> bool {
        self.planned.is_none() && self.actual.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeRecord {
    pub end_hour: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SlotRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub planned: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actual: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<ActivityItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan_activities: Vec<ActivityItem>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan_title: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub plan_title_band_on: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub actual_title_band_on: bool,
    #[serde(default, skip_serializing_if = "no_active_units")]
    pub actual_grid_units: Vec<bool>,
    #[serde(default, skip_serializing_if = "no_active_units")]
    pub actual_extra_grid_units: Vec<bool>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub actual_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<MergedRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRangeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<SlotTimer>,
}

impl SlotRecord {
    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
            && self.actual.is_empty()
            && self.details.is_empty()
            && self.activities.is_empty()
            && self.plan_activities.is_empty()
            && self.plan_title.is_empty()
            && !self.plan_title_band_on
            && !self.actual_title_band_on
            && no_active_units(&self.actual_grid_units)
            && no_active_units(&self.actual_extra_grid_units)
            && !self.actual_override
            && self.merged.as_ref().is_none_or(MergedRecord::is_empty)
            && self.time_range.is_none()
            && self.timer.as_ref().is_none_or(SlotTimer::is_idle)
    }

    pub fn has_planned_merge(&self) -> bool {
        self.merged
            .as_ref()
            .is_some_and(|merged| merged.planned.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DayRecord {
    #[serde(default)]
    pub slots: BTreeMap<String, SlotRecord>,
}

impl DayRecord {
    pub fn is_empty(&self) -> bool {
        self.slots.values().all(SlotRecord::is_empty)
    }

    pub fn slot(&self, hour: u8) -> Option<&SlotRecord> {
        self.slots.get(&hour.to_string())
    }

    pub fn signature(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn remove_routine_fill(&mut self, label: &str, hours: &[u8]) -> usize {
        let mut removed = 0;
        for hour in hours {
            let key = hour.to_string();
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };
            if slot.has_planned_merge() || slot.planned.trim() != label {
                continue;
            }
            slot.planned.clear();
            slot.plan_title.clear();
            slot.plan_title_band_on = false;
            slot.plan_activities.clear();
            removed += 1;
            if slot.is_empty() {
                self.slots.remove(&key);
            }
        }
        removed
    }
}

pub fn encode_day(record: &DayRecord) -> Result<Value, serde_json::Error> {
    serde_json::to_value(record)
}

pub fn decode_day(payload: &Value) -> Result<DayRecord, serde_json::Error> {
    DayRecord::deserialize(payload)
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivityCatalogSlots {
    #[serde(default)]
    activities: ActivityCatalog,
}

#[derive(Debug, Serialize, Deserialize)]
struct RoutineCatalogSlots {
    #[serde(default)]
    routines: RoutineCatalog,
}

pub fn encode_activity_catalog(catalog: &ActivityCatalog) -> Result<Value, serde_json::Error> {
    serde_json::to_value(ActivityCatalogSlots {
        activities: catalog.clone(),
    })
    .map(|slots| serde_json::json!({ "slots": slots }))
}

pub fn decode_activity_catalog(payload: &Value) -> Result<ActivityCatalog, serde_json::Error> {
    let slots = payload.get("slots").cloned().unwrap_or(Value::Null);
    if slots.is_null() {
        return Ok(ActivityCatalog::default());
    }
    ActivityCatalogSlots::deserialize(slots).map(|decoded| decoded.activities)
}

pub fn encode_routine_catalog(catalog: &RoutineCatalog) -> Result<Value, serde_json::Error> {
    serde_json::to_value(RoutineCatalogSlots {
        routines: catalog.clone(),
    })
    .map(|slots| serde_json::json!({ "slots": slots }))
}

pub fn decode_routine_catalog(payload: &Value) -> Result<RoutineCatalog, serde_json::Error> {
    let slots = payload.get("slots").cloned().unwrap_or(Value::Null);
    if slots.is_null() {
        return Ok(RoutineCatalog::default());
    }
    let mut catalog = RoutineCatalogSlots::deserialize(slots)?.routines;
    catalog.items.retain(|routine| match routine.validate() {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(routine_id = routine.id.as_str(), error = error.as_str(), "dropping invalid routine");
            false
        }
    });
    Ok(catalog)
}
