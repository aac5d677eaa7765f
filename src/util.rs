/// Quote identifier (double-quote, escaping inner double-quotes).
pub fn qi(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into dynamic SQL (single-quote,
/// escaping inner single-quotes). Used only for identifiers and values that
/// never originate from untrusted query parameters — see
/// `ParameterizedFragmentRejected` for the boundary this must not cross.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn sql_literal_or_null(value: &Option<String>) -> String {
    match value {
        Some(s) => sql_literal(s),
        None => "NULL".to_string(),
    }
}

pub fn sql_jsonb_or_null(value: &Option<serde_json::Value>) -> String {
    match value {
        Some(v) => format!(
            "{}::jsonb",
            sql_literal(&serde_json::to_string(v).unwrap_or_else(|_| "null".to_string()))
        ),
        None => "NULL".to_string(),
    }
}

/// Split an external `"category/type"` reference on the first `/`. Both
/// sides must be non-empty (§6 naming conventions).
pub fn split_event_type_ref(reference: &str) -> Option<(&str, &str)> {
    let idx = reference.find('/')?;
    let (category, rest) = reference.split_at(idx);
    let event_type = &rest[1..];
    if category.is_empty() || event_type.is_empty() {
        None
    } else {
        Some((category, event_type))
    }
}
