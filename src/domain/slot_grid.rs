use crate::domain::models::{SLOTS_PER_DAY, TimeSlot};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum DayStartHour {
    #[default]
    Midnight,
    Four,
}

impl DayStartHour {
    pub fn hour(self) -> u8 {
        match self {
            Self::Midnight => 0,
            Self::Four => 4,
        }
    }
}

impl TryFrom<u8> for DayStartHour {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Midnight),
            4 => Ok(Self::Four),
            other => Err(format!("day start hour must be 0 or 4, got {other}")),
        }
    }
}

impl From<DayStartHour> for u8 {
    fn from(value: DayStartHour) -> Self {
        value.hour()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrid {
    day_start: DayStartHour,
    slots: Vec<TimeSlot>,
}

impl SlotGrid {
    pub fn new(day_start: DayStartHour) -> Self {
        let slots = (0..SLOTS_PER_DAY)
            .map(|index| {
                let hour = (day_start.hour() as usize + index) % SLOTS_PER_DAY;
                TimeSlot::new(index, label_for_hour(hour as u8))
            })
            .collect();
        Self { day_start, slots }
    }

    pub fn day_start(&self) -> DayStartHour {
        self.day_start
    }

    pub fn slots(&self) -> &[TimeSlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [TimeSlot] {
        &mut self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&TimeSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut TimeSlot> {
        self.slots.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_blank(&self) -> bool {
        self.slots.iter().all(TimeSlot::is_empty)
    }

    pub fn hour_for_index(&self, index: usize) -> Option<u8> {
        (index < SLOTS_PER_DAY)
            .then(|| ((self.day_start.hour() as usize + index) % SLOTS_PER_DAY) as u8)
    }

    pub fn index_for_hour(&self, hour: u8) -> Option<usize> {
        (hour < 24).then(|| {
            (hour as usize + SLOTS_PER_DAY - self.day_start.hour() as usize) % SLOTS_PER_DAY
        })
    }

    pub fn hour_for_label(&self, label: &str) -> Option<u8> {
        hour_for_label(label)
    }

    pub fn label_for_hour(&self, hour: u8) -> Option<String> {
        (hour < 24).then(|| label_for_hour(hour))
    }

    pub fn slot_start(&self, date: NaiveDate, index: usize, tz: Tz) -> Option<DateTime<Utc>> {
        let hour = self.hour_for_index(index)?;
        let calendar_date = if hour < self.day_start.hour() {
            date.succ_opt()?
        } else {
            date
        };
        let naive = calendar_date.and_time(NaiveTime::from_hms_opt(hour as u32, 0, 0)?);
        let local = match tz.from_local_datetime(&naive).earliest() {
            Some(value) => value,
            // Spring-forward gap: the hour does not exist locally, use the next one.
            None => tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()?,
        };
        Some(local.with_timezone(&Utc))
    }
}

pub fn label_for_hour(hour: u8) -> String {
    format!("{hour:02}:00")
}

pub fn hour_for_label(label: &str) -> Option<u8> {
    let trimmed = label.trim();
    let hour_part = trimmed.split(':').next()?;
    let hour = hour_part.parse::<u8>().ok()?;
    if hour > 23 {
        return None;
    }
    match trimmed.split_once(':') {
        None => Some(hour),
        Some((_, "00")) => Some(hour),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date")
    }

    #[test]
    fn grid_has_24_slots_labelled_from_day_start() {
        let grid = SlotGrid::new(DayStartHour::Four);
        assert_eq!(grid.len(), 24);
        assert_eq!(grid.slots()[0].label, "04:00");
        assert_eq!(grid.slots()[19].label, "23:00");
        assert_eq!(grid.slots()[20].label, "00:00");
        assert_eq!(grid.slots()[23].label, "03:00");
    }

    #[test]
    fn hour_and_index_translate_both_ways() {
        for start in [DayStartHour::Midnight, DayStartHour::Four] {
            let grid = SlotGrid::new(start);
            for index in 0..24 {
                let hour = grid.hour_for_index(index).expect("hour");
                assert_eq!(grid.index_for_hour(hour), Some(index));
                let label = grid.label_for_hour(hour).expect("label");
                assert_eq!(grid.hour_for_label(&label), Some(hour));
            }
        }
        let grid = SlotGrid::new(DayStartHour::Midnight);
        assert_eq!(grid.hour_for_index(24), None);
        assert_eq!(grid.index_for_hour(24), None);
    }

    #[test]
    fn label_parsing_rejects_garbage() {
        assert_eq!(hour_for_label("9"), Some(9));
        assert_eq!(hour_for_label("09:00"), Some(9));
        assert_eq!(hour_for_label("09:30"), None);
        assert_eq!(hour_for_label("25:00"), None);
        assert_eq!(hour_for_label("noon"), None);
    }

    #[test]
    fn day_start_rejects_other_hours() {
        assert!(DayStartHour::try_from(4).is_ok());
        assert!(DayStartHour::try_from(6).is_err());
    }

    #[test]
    fn slot_start_rolls_early_hours_to_next_date() {
        let grid = SlotGrid::new(DayStartHour::Four);
        let start = grid.slot_start(date(), 20, Tz::UTC).expect("slot start");
        assert_eq!(start.to_rfc3339(), "2026-02-17T00:00:00+00:00");

        let start = grid.slot_start(date(), 0, chrono_tz::Asia::Seoul).expect("slot start");
        assert_eq!(start.to_rfc3339(), "2026-02-15T19:00:00+00:00");
    }
}
