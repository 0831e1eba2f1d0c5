use crate::domain::timer::SlotTimer;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub const SLOTS_PER_DAY: usize = 24;
pub const GRID_UNIT_SECONDS: u64 = 600;
pub const UNITS_PER_HOUR: usize = 6;
pub const SECONDS_PER_HOUR: u64 = 3600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ActivitySource {
    Grid,
    Extra,
    PlanTemplate,
    #[default]
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub label: String,
    pub seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_seconds: Option<u64>,
    #[serde(default)]
    pub source: ActivitySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

impl ActivityItem {
    pub fn new(label: impl Into<String>, seconds: u64, source: ActivitySource) -> Self {
        Self {
            label: label.into(),
            seconds,
            recorded_seconds: None,
            source,
            order: None,
        }
    }

    pub fn with_recorded(mut self, recorded_seconds: u64) -> Self {
        self.recorded_seconds = Some(recorded_seconds);
        self
    }

    pub fn realized_seconds(&self) -> u64 {
        self.recorded_seconds.unwrap_or(self.seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.label, "activity.label")?;
        if let Some(recorded) = self.recorded_seconds {
            if self.source != ActivitySource::Extra && recorded > self.seconds {
                return Err(
                    "activity.recorded_seconds must be <= activity.seconds for plan items"
                        .to_string(),
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub details: String,
    pub sub_activities: Vec<ActivityItem>,
    pub title_band_on: bool,
    pub actual_grid_units: Vec<bool>,
    pub actual_extra_grid_units: Vec<bool>,
    pub actual_override: bool,
}

impl ActivityLog {
    pub fn is_empty(&self) -> bool {
        self.details.trim().is_empty()
            && self.sub_activities.is_empty()
            && !self.title_band_on
            && !self.actual_grid_units.iter().any(|unit| *unit)
            && !self.actual_extra_grid_units.iter().any(|unit| *unit)
            && !self.actual_override
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub index: usize,
    pub label: String,
    pub planned: String,
    pub actual: String,
    pub plan_activities: Vec<ActivityItem>,
    pub activity_log: ActivityLog,
    pub plan_title: String,
    pub plan_title_band_on: bool,
    pub timer: SlotTimer,
}

impl TimeSlot {
    pub fn new(index: usize, label: String) -> Self {
        Self {
            index,
            label,
            planned: String::new(),
            actual: String::new(),
            plan_activities: Vec::new(),
            activity_log: ActivityLog::default(),
            plan_title: String::new(),
            plan_title_band_on: false,
            timer: SlotTimer::default(),
        }
    }

    pub fn has_planned_content(&self) -> bool {
        !self.planned.trim().is_empty()
            || !self.plan_title.trim().is_empty()
            || !self.plan_activities.is_empty()
    }

    pub fn clear_planned(&mut self) {
        self.planned.clear();
        self.plan_title.clear();
        self.plan_title_band_on = false;
        self.plan_activities.clear();
    }

    pub fn is_empty(&self) -> bool {
        !self.has_planned_content()
            && !self.plan_title_band_on
            && self.actual.trim().is_empty()
            && self.activity_log.is_empty()
            && self.timer.is_idle()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MergeChannel {
    Planned,
    Actual,
    Time,
}

impl MergeChannel {
    pub const ALL: [MergeChannel; 3] = [Self::Planned, Self::Actual, Self::Time];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Actual => "actual",
            Self::Time => "time",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "planned" => Some(Self::Planned),
            "actual" => Some(Self::Actual),
            "time" => Some(Self::Time),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutinePattern {
    Daily,
    Weekday,
    Weekend,
}

impl RoutinePattern {
    pub fn matches(self, weekday: Weekday) -> bool {
        let weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
        match self {
            Self::Daily => true,
            Self::Weekday => !weekend,
            Self::Weekend => weekend,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekday" | "weekdays" => Some(Self::Weekday),
            "weekend" | "weekends" => Some(Self::Weekend),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Routine {
    pub id: String,
    pub label: String,
    pub start_hour: u8,
    pub duration_hours: u8,
    pub pattern: RoutinePattern,
    #[serde(default)]
    pub pass_dates: Vec<String>,
    #[serde(default)]
    pub stopped_at_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl Routine {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "routine.id")?;
        validate_non_empty(&self.label, "routine.label")?;
        if self.start_hour > 23 {
            return Err("routine.start_hour must be <= 23".to_string());
        }
        if self.duration_hours == 0 || self.duration_hours as usize > SLOTS_PER_DAY {
            return Err("routine.duration_hours must be within 1..=24".to_string());
        }
        for date in &self.pass_dates {
            validate_date(date, "routine.pass_dates[]")?;
        }
        Ok(())
    }

    pub fn hours(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.duration_hours).map(|offset| ((u16::from(self.start_hour) + u16::from(offset)) % 24) as u8)
    }

    pub fn is_passed_on(&self, date: NaiveDate) -> bool {
        let key = date.to_string();
        self.pass_dates.iter().any(|candidate| candidate == &key)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_at_ms.is_some()
    }

    pub fn same_window(&self, start_hour: u8, duration_hours: u8) -> bool {
        self.start_hour == start_hour && self.duration_hours == duration_hours
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCatalog {
    pub items: Vec<String>,
}

impl ActivityCatalog {
    pub fn extend_from(&mut self, activities: &[ActivityItem]) -> bool {
        let before = self.items.len();
        for activity in activities {
            let label = activity.label.trim();
            if !label.is_empty() && !self.items.iter().any(|known| known == label) {
                self.items.push(label.to_string());
            }
        }
        self.items.len() != before
    }
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_routine() -> Routine {
        Routine {
            id: "rtn-1".to_string(),
            label: "Workout".to_string(),
            start_hour: 6,
            duration_hours: 1,
            pattern: RoutinePattern::Weekday,
            pass_dates: vec!["2026-02-21".to_string()],
            stopped_at_ms: None,
            created_at: fixed_time("2026-02-16T08:00:00Z"),
            updated_at: fixed_time("2026-02-16T08:00:00Z"),
            updated_by: Some("user-1".to_string()),
        }
    }

    #[test]
    fn routine_validate_accepts_valid_routine() {
        assert!(sample_routine().validate().is_ok());
    }

    #[test]
    fn routine_validate_rejects_bad_window_and_dates() {
        let mut routine = sample_routine();
        routine.duration_hours = 0;
        assert!(routine.validate().is_err());

        let mut routine = sample_routine();
        routine.start_hour = 24;
        assert!(routine.validate().is_err());

        let mut routine = sample_routine();
        routine.pass_dates.push("21/02/2026".to_string());
        assert!(routine.validate().is_err());
    }

    #[test]
    fn routine_hours_wrap_past_midnight() {
        let mut routine = sample_routine();
        routine.start_hour = 23;
        routine.duration_hours = 3;
        assert_eq!(routine.hours().collect::<Vec<_>>(), vec![23, 0, 1]);
    }

    #[test]
    fn pattern_matches_weekdays_and_weekends() {
        assert!(RoutinePattern::Weekday.matches(Weekday::Mon));
        assert!(!RoutinePattern::Weekday.matches(Weekday::Sat));
        assert!(RoutinePattern::Weekend.matches(Weekday::Sun));
        assert!(!RoutinePattern::Weekend.matches(Weekday::Fri));
        assert!(RoutinePattern::Daily.matches(Weekday::Wed));
    }

    #[test]
    fn activity_validate_rejects_overrecorded_plan_item() {
        let item = ActivityItem::new("Write", 600, ActivitySource::Grid).with_recorded(1200);
        assert!(item.validate().is_err());
        let extra = ActivityItem::new("Walk", 600, ActivitySource::Extra).with_recorded(1200);
        assert!(extra.validate().is_ok());
    }

    #[test]
    fn slot_planned_content_detection() {
        let mut slot = TimeSlot::new(0, "00:00".to_string());
        assert!(!slot.has_planned_content());
        slot.plan_title = "Morning".to_string();
        assert!(slot.has_planned_content());
        slot.clear_planned();
        assert!(slot.is_empty());
    }

    #[test]
    fn activity_catalog_grows_with_unseen_labels() {
        let mut catalog = ActivityCatalog::default();
        let activities = vec![
            ActivityItem::new("Write", 600, ActivitySource::Manual),
            ActivityItem::new(" Write ", 600, ActivitySource::Manual),
            ActivityItem::new("Read", 600, ActivitySource::Manual),
        ];
        assert!(catalog.extend_from(&activities));
        assert_eq!(catalog.items, vec!["Write".to_string(), "Read".to_string()]);
        assert!(!catalog.extend_from(&activities));
    }

    #[test]
    fn routine_serde_uses_camel_case_payload() {
        let routine = sample_routine();
        let json = serde_json::to_value(&routine).expect("serialize routine");
        assert_eq!(json["startHour"], 6);
        assert_eq!(json["pattern"], "weekday");
        assert!(json.get("stoppedAtMs").is_some());
        let roundtrip: Routine = serde_json::from_value(json).expect("deserialize routine");
        assert_eq!(roundtrip, routine);
    }
}
