//! Row codec for the durable table files.
//!
//! Fixed-header delimited text, one row per line. Fields are comma-separated
//! with minimal quoting (`raw_detections` carries JSON, so commas and quotes
//! inside a field must survive). Defect columns are laid out in vocabulary
//! order so the header is stable per component.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::models::{Component, EventRow, PredictionStatus, SessionRow};

const EVENT_BASE_COLUMNS: usize = 7;
const EVENT_TAIL_COLUMNS: usize = 4;
const SESSION_BASE_COLUMNS: usize = 6;

pub fn event_header(component: Component) -> String {
    let mut columns = vec![
        "prediction_id".to_string(),
        "session_id".to_string(),
        "timestamp".to_string(),
        "roller_type".to_string(),
        "employee_id".to_string(),
        "status".to_string(),
        "total_detections".to_string(),
    ];
    for class in component.defect_classes() {
        columns.push(format!("{class}_count"));
    }
    columns.extend([
        "avg_confidence".to_string(),
        "max_confidence".to_string(),
        "min_confidence".to_string(),
        "raw_detections".to_string(),
    ]);
    columns.join(",")
}

pub fn session_header(component: Component) -> String {
    let mut columns = vec![
        "session_id".to_string(),
        "start_of_session".to_string(),
        "end_of_session".to_string(),
        "total_inspected".to_string(),
        "total_accepted".to_string(),
        "total_rejected".to_string(),
    ];
    for class in component.defect_classes() {
        columns.push(format!("{class}_detections"));
    }
    columns.join(",")
}

pub fn encode_event(component: Component, row: &EventRow) -> String {
    let mut fields = vec![
        row.prediction_id.clone(),
        row.session_id.clone(),
        row.timestamp.to_rfc3339(),
        row.roller_type.clone(),
        row.employee_id.clone(),
        row.status.as_str().to_string(),
        row.total_detections.to_string(),
    ];
    for class in component.defect_classes() {
        let count = row.defect_counts.get(*class).copied().unwrap_or(0);
        fields.push(count.to_string());
    }
    fields.push(format_float(row.avg_confidence));
    fields.push(format_float(row.max_confidence));
    fields.push(format_float(row.min_confidence));
    fields.push(row.raw_detections.clone());

    join_fields(&fields)
}

pub fn decode_event(component: Component, line: &str) -> CoreResult<EventRow> {
    let vocabulary = component.defect_classes();
    let expected = EVENT_BASE_COLUMNS + vocabulary.len() + EVENT_TAIL_COLUMNS;
    let fields = split_row(line);
    if fields.len() != expected {
        return Err(CoreError::Validation(format!(
            "event row has {} fields, expected {expected}",
            fields.len()
        )));
    }

    let status = PredictionStatus::parse(&fields[5])
        .ok_or_else(|| CoreError::Validation(format!("unknown status '{}'", fields[5])))?;

    let mut defect_counts = BTreeMap::new();
    for (offset, class) in vocabulary.iter().enumerate() {
        let count = parse_u64(&fields[EVENT_BASE_COLUMNS + offset], class)?;
        if count > 0 {
            defect_counts.insert(class.to_string(), count);
        }
    }

    let tail = EVENT_BASE_COLUMNS + vocabulary.len();
    Ok(EventRow {
        prediction_id: fields[0].clone(),
        session_id: fields[1].clone(),
        timestamp: parse_timestamp(&fields[2], "timestamp")?,
        roller_type: fields[3].clone(),
        employee_id: fields[4].clone(),
        status,
        total_detections: parse_u64(&fields[6], "total_detections")?,
        defect_counts,
        avg_confidence: parse_f64(&fields[tail], "avg_confidence")?,
        max_confidence: parse_f64(&fields[tail + 1], "max_confidence")?,
        min_confidence: parse_f64(&fields[tail + 2], "min_confidence")?,
        raw_detections: fields[tail + 3].clone(),
    })
}

pub fn encode_session(component: Component, row: &SessionRow) -> String {
    let mut fields = vec![
        row.session_id.clone(),
        row.start_of_session.to_rfc3339(),
        row.end_of_session
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default(),
        row.total_inspected.to_string(),
        row.total_accepted.to_string(),
        row.total_rejected.to_string(),
    ];
    for class in component.defect_classes() {
        let count = row.defect_totals.get(*class).copied().unwrap_or(0);
        fields.push(count.to_string());
    }

    join_fields(&fields)
}

pub fn decode_session(component: Component, line: &str) -> CoreResult<SessionRow> {
    let vocabulary = component.defect_classes();
    let expected = SESSION_BASE_COLUMNS + vocabulary.len();
    let fields = split_row(line);
    if fields.len() != expected {
        return Err(CoreError::Validation(format!(
            "session row has {} fields, expected {expected}",
            fields.len()
        )));
    }

    let end_of_session = if fields[2].is_empty() {
        None
    } else {
        Some(parse_timestamp(&fields[2], "end_of_session")?)
    };

    let mut defect_totals = BTreeMap::new();
    for (offset, class) in vocabulary.iter().enumerate() {
        let count = parse_u64(&fields[SESSION_BASE_COLUMNS + offset], class)?;
        defect_totals.insert(class.to_string(), count);
    }

    Ok(SessionRow {
        session_id: fields[0].clone(),
        start_of_session: parse_timestamp(&fields[1], "start_of_session")?,
        end_of_session,
        total_inspected: parse_u64(&fields[3], "total_inspected")?,
        total_accepted: parse_u64(&fields[4], "total_accepted")?,
        total_rejected: parse_u64(&fields[5], "total_rejected")?,
        defect_totals,
    })
}

fn format_float(value: f64) -> String {
    // Enough digits to round-trip the confidence values we store.
    format!("{value:.6}")
}

fn parse_timestamp(value: &str, field: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| CoreError::Validation(format!("invalid {field} '{value}': {err}")))
}

fn parse_u64(value: &str, field: &str) -> CoreResult<u64> {
    value
        .parse::<u64>()
        .map_err(|err| CoreError::Validation(format!("invalid {field} '{value}': {err}")))
}

fn parse_f64(value: &str, field: &str) -> CoreResult<f64> {
    value
        .parse::<f64>()
        .map_err(|err| CoreError::Validation(format!("invalid {field} '{value}': {err}")))
}

fn join_fields(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one row into fields, honoring double-quoted fields with `""`
/// escapes. Tolerant of anything `join_fields` can produce.
fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}
