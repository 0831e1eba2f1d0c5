use crate::domain::duration_text;
use crate::domain::models::TimeSlot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerMethod {
    #[default]
    Timer,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SlotTimer {
    pub running: bool,
    pub elapsed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub method: TimerMethod,
}

impl SlotTimer {
    pub fn is_idle(&self) -> bool {
        !self.running && self.elapsed == 0
    }

    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        let live = match (self.running, self.start_time) {
            (true, Some(start)) => (now - start).num_seconds().max(0) as u64,
            _ => 0,
        };
        self.elapsed.saturating_add(live)
    }

    fn start(&mut self, now: DateTime<Utc>) {
        if self.running {
            return;
        }
        self.running = true;
        self.start_time = Some(now);
        self.method = TimerMethod::Timer;
    }

    fn stop(&mut self, now: DateTime<Utc>) -> bool {
        if !self.running {
            return false;
        }
        self.elapsed = self.elapsed_at(now);
        self.running = false;
        self.start_time = None;
        self.method = TimerMethod::Timer;
        true
    }

    pub fn apply_manual_text(&mut self, text: &str) -> bool {
        let Some(seconds) = duration_text::parse(text) else {
            return false;
        };
        self.running = false;
        self.start_time = None;
        self.elapsed = seconds;
        self.method = TimerMethod::Manual;
        true
    }

    pub fn display(&self, now: DateTime<Utc>) -> String {
        let elapsed = self.elapsed_at(now);
        if self.running {
            duration_text::format_clock(elapsed)
        } else {
            duration_text::format(elapsed)
        }
    }
}

pub fn start_exclusive(slots: &mut [TimeSlot], index: usize, now: DateTime<Utc>) -> Vec<usize> {
    if index >= slots.len() {
        return Vec::new();
    }
    let mut stopped = Vec::new();
    for slot in slots.iter_mut() {
        if slot.index != index && slot.timer.stop(now) {
            stopped.push(slot.index);
        }
    }
    slots[index].timer.start(now);
    stopped
}

pub fn stop(slots: &mut [TimeSlot], index: usize, now: DateTime<Utc>) -> bool {
    slots
        .get_mut(index)
        .map(|slot| slot.timer.stop(now))
        .unwrap_or(false)
}

pub fn stop_all(slots: &mut [TimeSlot], now: DateTime<Utc>) -> Vec<usize> {
    slots
        .iter_mut()
        .filter_map(|slot| slot.timer.stop(now).then_some(slot.index))
        .collect()
}

pub fn reset(slots: &mut [TimeSlot], index: usize) {
    if let Some(slot) = slots.get_mut(index) {
        slot.timer = SlotTimer::default();
    }
}

pub fn running_index(slots: &[TimeSlot]) -> Option<usize> {
    slots
        .iter()
        .find(|slot| slot.timer.running)
        .map(|slot| slot.index)
}
