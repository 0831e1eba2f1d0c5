use regex::Regex;
use std::sync::LazyLock;

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+):([0-5]\d)(?::([0-5]\d))?").expect("clock pattern compiles")
});

static UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+(?:\.\d+)?)\s*(hours|hour|hrs|hr|h|시간|minutes|minute|mins|min|m|분|seconds|second|secs|sec|s|초)",
    )
    .expect("unit pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Hour,
    Minute,
    Second,
}

impl Unit {
    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "hours" | "hour" | "hrs" | "hr" | "h" | "시간" => Some(Self::Hour),
            "minutes" | "minute" | "mins" | "min" | "m" | "분" => Some(Self::Minute),
            "seconds" | "second" | "secs" | "sec" | "s" | "초" => Some(Self::Second),
            _ => None,
        }
    }

    fn seconds(self) -> f64 {
        match self {
            Self::Hour => 3600.0,
            Self::Minute => 60.0,
            Self::Second => 1.0,
        }
    }
}

pub fn parse(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(seconds) = parse_last_clock(text) {
        return Some(seconds);
    }
    // Bare numbers without a unit never count.
    let tokens = unit_tokens(text);
    if tokens.is_empty() {
        return None;
    }
    let total = tokens
        .iter()
        .map(|(value, unit)| value * unit.seconds())
        .sum::<f64>();
    Some(total.round() as u64)
}

fn parse_last_clock(text: &str) -> Option<u64> {
    let captures = CLOCK_RE.captures_iter(text).last()?;
    let hours = captures.get(1)?.as_str().parse::<u64>().ok()?;
    let minutes = captures.get(2)?.as_str().parse::<u64>().ok()?;
    let seconds = captures
        .get(3)
        .map(|value| value.as_str().parse::<u64>())
        .transpose()
        .ok()?
        .unwrap_or(0);
    hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + seconds)
}

fn unit_tokens(text: &str) -> Vec<(f64, Unit)> {
    let mut tokens = Vec::new();
    for captures in UNIT_RE.captures_iter(text) {
        let (Some(number), Some(token)) = (captures.get(1), captures.get(2)) else {
            continue;
        };
        // "5 mango" must not read as five minutes.
        let trailing = text[token.end()..].chars().next();
        if trailing.is_some_and(|ch| ch.is_ascii_alphabetic()) {
            continue;
        }
        let preceding = text[..number.start()].chars().next_back();
        if preceding.is_some_and(|ch| ch == '.' || ch.is_ascii_digit()) {
            continue;
        }
        let (Ok(value), Some(unit)) =
            (number.as_str().parse::<f64>(), Unit::from_token(token.as_str()))
        else {
            continue;
        };
        tokens.push((value, unit));
    }
    tokens
}

pub fn format(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}

pub fn format_clock(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
