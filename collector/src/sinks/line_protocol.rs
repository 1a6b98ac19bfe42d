//! InfluxDB line protocol encoding.
//!
//! `measurement,tag=v field=1i,other="x" 1700000000000000000`
//!
//! Tags and fields are written in name order. NULL fields, non-finite floats
//! and tags with an empty key or value are left out; a point with nothing
//! left to write is skipped. Line breaks are always escaped so every point
//! stays on one line.

use std::fmt::Write;

use tracing::warn;

use common::models::FieldValue;

use super::Point;

/// Encodes a batch, one line per point.
pub fn encode_batch(points: &[Point]) -> String {
    let mut body = String::new();
    for point in points {
        match encode_point(point) {
            Some(line) => {
                body.push_str(&line);
                body.push('\n');
            }
            None if point.measurement.is_empty() => warn!("point has no measurement, skipped"),
            None => warn!(measurement = %point.measurement, "point has no writable fields, skipped"),
        }
    }
    body
}

/// Encodes one point, or `None` when it has no measurement or no writable field.
pub fn encode_point(point: &Point) -> Option<String> {
    if point.measurement.is_empty() {
        return None;
    }

    let mut fields = String::new();
    for (key, value) in &point.fields {
        let Some(encoded) = encode_field(value) else {
            continue;
        };
        if !fields.is_empty() {
            fields.push(',');
        }
        escape_into(&mut fields, key, &[',', '=', ' ']);
        fields.push('=');
        fields.push_str(&encoded);
    }
    if fields.is_empty() {
        return None;
    }

    let mut line = String::new();
    escape_into(&mut line, &point.measurement, &[',', ' ']);
    for (key, value) in &point.tags {
        if key.is_empty() || value.is_empty() {
            continue;
        }
        line.push(',');
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape_into(&mut line, value, &[',', '=', ' ']);
    }
    line.push(' ');
    line.push_str(&fields);
    if let Some(nanos) = point.timestamp.timestamp_nanos_opt() {
        let _ = write!(line, " {}", nanos);
    }
    Some(line)
}

fn encode_field(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Bool(v) => Some(v.to_string()),
        FieldValue::Int(v) => Some(format!("{}i", v)),
        FieldValue::Float(v) if v.is_finite() => Some(v.to_string()),
        FieldValue::Float(_) => None,
        FieldValue::Text(v) => {
            let mut quoted = String::with_capacity(v.len() + 2);
            quoted.push('"');
            escape_into(&mut quoted, v, &['"', '\\']);
            quoted.push('"');
            Some(quoted)
        }
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => {
                if special.contains(&c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
}
