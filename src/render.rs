//! Turning records and JSON values into LLM-readable text.

use serde_json::Value;

/// Title-field fallbacks, checked in order when a doctype declares no
/// display field of its own.
const TITLE_FIELDS: &[&str] = &[
    "title",
    "name1",
    "video_name",
    "assignment_name",
    "project_name",
    "quiz_name",
    "objective_name",
    "unit_name",
    "comp_name",
    "note_name",
];

/// Render a scalar JSON value without quotes or escapes.
pub fn to_plain(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn title_case(field: &str) -> String {
    field
        .split('_')
        .filter(|p| !p.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render one record as a compact text block for retrieval context and
/// embedding input.
///
/// The block leads with the record's human title (the doctype's display
/// field when declared, otherwise the first populated fallback field),
/// then the doctype and id, then every remaining non-empty field as
/// `Label: value` lines.
pub fn record_to_text(doctype: &str, display_field: Option<&str>, record: &Value) -> String {
    let Some(obj) = record.as_object() else {
        return to_plain(record);
    };

    let mut title_key: Option<&str> = None;
    if let Some(field) = display_field {
        if obj.get(field).map(is_populated).unwrap_or(false) {
            title_key = Some(field);
        }
    }
    if title_key.is_none() {
        title_key = TITLE_FIELDS
            .iter()
            .find(|f| obj.get(**f).map(is_populated).unwrap_or(false))
            .copied();
    }

    let mut lines = Vec::with_capacity(obj.len() + 2);
    if let Some(key) = title_key {
        lines.push(format!("{}: {}", title_case(key), to_plain(&obj[key])));
    }
    lines.push(format!("DocType: {doctype}"));
    if let Some(name) = obj.get("name") {
        if is_populated(name) {
            lines.push(format!("ID: {}", to_plain(name)));
        }
    }
    for (key, value) in obj {
        if key == "name" || Some(key.as_str()) == title_key {
            continue;
        }
        if !is_populated(value) {
            continue;
        }
        lines.push(format!("{}: {}", title_case(key), to_plain(value)));
    }
    lines.join("\n")
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}
