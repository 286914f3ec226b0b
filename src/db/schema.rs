//! SQL text and parameter building for the per-component tables.
//!
//! Column layouts mirror the durable file headers; the defect columns are
//! generated from the component vocabulary so the two tiers can never drift.

use rusqlite::types::Value;

use crate::error::{CoreError, CoreResult};
use crate::models::{Component, EventRow, SessionRow};

pub fn events_table(component: Component) -> String {
    format!("{component}_inspection_events")
}

pub fn sessions_table(component: Component) -> String {
    format!("{component}_inspection_sessions")
}

/// Idempotent DDL. `prediction_id` is the primary key, which is what makes a
/// retried flush fail safely instead of duplicating rows.
pub fn create_events_ddl(component: Component) -> String {
    let mut columns = vec![
        "prediction_id TEXT PRIMARY KEY".to_string(),
        "session_id TEXT NOT NULL".to_string(),
        "timestamp TEXT NOT NULL".to_string(),
        "roller_type TEXT NOT NULL".to_string(),
        "employee_id TEXT NOT NULL".to_string(),
        "status TEXT NOT NULL".to_string(),
        "total_detections INTEGER NOT NULL".to_string(),
    ];
    for class in component.defect_classes() {
        columns.push(format!("{class}_count INTEGER NOT NULL"));
    }
    columns.extend([
        "avg_confidence REAL NOT NULL".to_string(),
        "max_confidence REAL NOT NULL".to_string(),
        "min_confidence REAL NOT NULL".to_string(),
        "raw_detections TEXT NOT NULL".to_string(),
    ]);

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        events_table(component),
        columns.join(",\n    ")
    )
}

pub fn create_sessions_ddl(component: Component) -> String {
    let mut columns = vec![
        "session_id TEXT PRIMARY KEY".to_string(),
        "start_of_session TEXT NOT NULL".to_string(),
        "end_of_session TEXT".to_string(),
        "total_inspected INTEGER NOT NULL".to_string(),
        "total_accepted INTEGER NOT NULL".to_string(),
        "total_rejected INTEGER NOT NULL".to_string(),
    ];
    for class in component.defect_classes() {
        columns.push(format!("{class}_detections INTEGER NOT NULL"));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        sessions_table(component),
        columns.join(",\n    ")
    )
}

pub fn insert_event_sql(component: Component) -> String {
    let mut columns = vec![
        "prediction_id",
        "session_id",
        "timestamp",
        "roller_type",
        "employee_id",
        "status",
        "total_detections",
    ]
    .into_iter()
    .map(str::to_string)
    .collect::<Vec<_>>();
    for class in component.defect_classes() {
        columns.push(format!("{class}_count"));
    }
    columns.extend([
        "avg_confidence".to_string(),
        "max_confidence".to_string(),
        "min_confidence".to_string(),
        "raw_detections".to_string(),
    ]);

    build_insert(&events_table(component), &columns)
}

pub fn insert_session_sql(component: Component) -> String {
    let mut columns = vec![
        "session_id",
        "start_of_session",
        "end_of_session",
        "total_inspected",
        "total_accepted",
        "total_rejected",
    ]
    .into_iter()
    .map(str::to_string)
    .collect::<Vec<_>>();
    for class in component.defect_classes() {
        columns.push(format!("{class}_detections"));
    }

    build_insert(&sessions_table(component), &columns)
}

pub fn event_params(component: Component, row: &EventRow) -> CoreResult<Vec<Value>> {
    let mut params = vec![
        Value::Text(row.prediction_id.clone()),
        Value::Text(row.session_id.clone()),
        Value::Text(row.timestamp.to_rfc3339()),
        Value::Text(row.roller_type.clone()),
        Value::Text(row.employee_id.clone()),
        Value::Text(row.status.as_str().to_string()),
        Value::Integer(to_i64(row.total_detections)?),
    ];
    for class in component.defect_classes() {
        let count = row.defect_counts.get(*class).copied().unwrap_or(0);
        params.push(Value::Integer(to_i64(count)?));
    }
    params.extend([
        Value::Real(row.avg_confidence),
        Value::Real(row.max_confidence),
        Value::Real(row.min_confidence),
        Value::Text(row.raw_detections.clone()),
    ]);
    Ok(params)
}

pub fn session_params(component: Component, row: &SessionRow) -> CoreResult<Vec<Value>> {
    let mut params = vec![
        Value::Text(row.session_id.clone()),
        Value::Text(row.start_of_session.to_rfc3339()),
        match row.end_of_session {
            Some(dt) => Value::Text(dt.to_rfc3339()),
            None => Value::Null,
        },
        Value::Integer(to_i64(row.total_inspected)?),
        Value::Integer(to_i64(row.total_accepted)?),
        Value::Integer(to_i64(row.total_rejected)?),
    ];
    for class in component.defect_classes() {
        let count = row.defect_totals.get(*class).copied().unwrap_or(0);
        params.push(Value::Integer(to_i64(count)?));
    }
    Ok(params)
}

fn build_insert(table: &str, columns: &[String]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn to_i64(value: u64) -> CoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| CoreError::Validation(format!("value {value} exceeds SQLite INTEGER range")))
}
