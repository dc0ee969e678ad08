//! Field extraction and normalization shared by the pipelines

use crate::error::SyncError;
use crate::sync::provider::Entity;
use chrono::NaiveDate;
use serde_json::Value;

/// First present, non-null field among `names`
pub fn field<'a>(entity: &'a Entity, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| entity.get(*name))
        .find(|value| !value.is_null())
}

/// Field as a trimmed, non-empty string; numbers are rendered
pub fn text(entity: &Entity, names: &[&str]) -> Option<String> {
    match field(entity, names)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Field as an integer, accepting numeric strings
pub fn integer(entity: &Entity, names: &[&str]) -> Option<i64> {
    match field(entity, names)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Field as a float, accepting numeric strings
pub fn number(entity: &Entity, names: &[&str]) -> Option<f64> {
    match field(entity, names)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// External id of an entity as a string
pub fn external_id(entity: &Entity, names: &[&str]) -> Result<String, SyncError> {
    text(entity, names).ok_or_else(|| SyncError::Transform(format!("entity has no {}", names.join("/"))))
}

/// Lookup form of an external id; numeric ids lose leading zeros
pub fn id_key(raw: &str) -> String {
    let raw = raw.trim();
    raw.parse::<i64>()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// `"6-7"` or `"6'7\""` to inches
pub fn height_inches(raw: &str) -> Option<i64> {
    let mut parts = raw
        .split(|c: char| c == '-' || c == '\'' || c == '"' || c.is_whitespace())
        .filter(|part| !part.is_empty());
    let feet: i64 = parts.next()?.parse().ok()?;
    let inches: i64 = parts.next().map_or(Some(0), |part| part.parse().ok())?;
    Some(feet * 12 + inches)
}

/// Leading digits of a jersey value such as `"23"` or `"#0"`
pub fn jersey_number(raw: &str) -> Option<i64> {
    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Seasons of experience; rookies are reported as `"R"`
pub fn experience_years(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("r") {
        Some(0)
    } else {
        raw.parse().ok()
    }
}

/// Calendar date from `YYYY-MM-DD` or a timestamp starting with one
pub fn calendar_date(raw: &str) -> Option<String> {
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// Split a display name into first and last name
pub fn split_name(full: &str) -> (String, String) {
    let full = full.trim();
    match full.split_once(char::is_whitespace) {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (full.to_string(), String::new()),
    }
}

/// `total / games`, rounded to two decimals; zero when no games were played
pub fn per_game(total: f64, games: i64) -> f64 {
    if games <= 0 {
        0.0
    } else {
        round2(total / games as f64)
    }
}

/// Shooting percentage as a fraction, rounded to three decimals
pub fn percentage(made: f64, attempted: f64) -> f64 {
    if attempted <= 0.0 {
        0.0
    } else {
        (made / attempted * 1000.0).round() / 1000.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
