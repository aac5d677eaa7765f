use pgrx::prelude::*;
use pgrx::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::eventstore::types::{AppendedEvent, ReadDirection};
use crate::util::sql_literal;

fn row_to_event(row: &pgrx::spi::SpiHeapTupleData) -> EngineResult<AppendedEvent> {
    Ok(AppendedEvent {
        position: row.get::<i64>(1)?.unwrap(),
        id: row.get::<Uuid>(2)?.unwrap(),
        stream: row.get::<Uuid>(3)?.unwrap(),
        stream_version: row.get::<i64>(4)?.unwrap(),
        category: row.get::<String>(5)?.unwrap_or_default(),
        event_type: row.get::<String>(6)?.unwrap_or_default(),
        data: row
            .get::<pgrx::JsonB>(7)?
            .map(|j| j.0)
            .unwrap_or(serde_json::Value::Null),
        metadata: row
            .get::<pgrx::JsonB>(8)?
            .map(|j| j.0)
            .unwrap_or(serde_json::Value::Null),
        created_at: row.get::<String>(9)?.unwrap_or_default(),
    })
}

const EVENT_COLUMNS: &str =
    "\"position\", id, stream, stream_version, category, type, data, metadata, created_at";

/// §4.8 `read_stream(stream, fromVersion, limit, direction)`: strictly
/// ordered by `stream_version`.
pub fn read_stream(
    stream: Uuid,
    from_version: i64,
    limit: i64,
    direction: &str,
) -> EngineResult<Vec<AppendedEvent>> {
    let direction = ReadDirection::from_str(direction).ok_or_else(|| {
        EngineError::InvariantViolation(format!("unknown read direction '{direction}'"))
    })?;
    let cmp = match direction {
        ReadDirection::Forward => ">",
        ReadDirection::Backward => "<",
    };
    let sql = format!(
        "SELECT {cols} FROM events.event \
         WHERE stream = {stream} AND stream_version {cmp} {from_version} \
         ORDER BY stream_version {order} LIMIT {limit}",
        cols = EVENT_COLUMNS,
        stream = sql_literal(&stream.to_string()),
        cmp = cmp,
        from_version = from_version,
        order = direction.sql_order(),
        limit = limit,
    );
    Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        table.into_iter().map(|r| row_to_event(&r)).collect()
    })
}

/// §4.8 `read_all(fromPosition, limit, filterTypes?, filterStreams?)`.
pub fn read_all(
    from_position: i64,
    limit: i64,
    filter_types: Option<&[String]>,
    filter_streams: Option<&[Uuid]>,
) -> EngineResult<Vec<AppendedEvent>> {
    let mut sql = format!(
        "SELECT {cols} FROM events.event WHERE \"position\" > {from_position}",
        cols = EVENT_COLUMNS,
        from_position = from_position,
    );
    if let Some(types) = filter_types {
        if !types.is_empty() {
            let list = types
                .iter()
                .map(|t| sql_literal(t))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND type IN ({list})"));
        }
    }
    if let Some(streams) = filter_streams {
        if !streams.is_empty() {
            let list = streams
                .iter()
                .map(|s| sql_literal(&s.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND stream IN ({list})"));
        }
    }
    sql.push_str(&format!(" ORDER BY \"position\" ASC LIMIT {limit}"));

    Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        table.into_iter().map(|r| row_to_event(&r)).collect()
    })
}

pub fn read_by_category(category: &str, from_position: i64, limit: i64) -> EngineResult<Vec<AppendedEvent>> {
    let sql = format!(
        "SELECT {cols} FROM events.event \
         WHERE category = {category} AND \"position\" > {from_position} \
         ORDER BY \"position\" ASC LIMIT {limit}",
        cols = EVENT_COLUMNS,
        category = sql_literal(category),
        from_position = from_position,
        limit = limit,
    );
    Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        table.into_iter().map(|r| row_to_event(&r)).collect()
    })
}

pub fn read_by_type(
    category: &str,
    event_type: &str,
    from_position: i64,
    limit: i64,
) -> EngineResult<Vec<AppendedEvent>> {
    let sql = format!(
        "SELECT {cols} FROM events.event \
         WHERE category = {category} AND type = {etype} AND \"position\" > {from_position} \
         ORDER BY \"position\" ASC LIMIT {limit}",
        cols = EVENT_COLUMNS,
        category = sql_literal(category),
        etype = sql_literal(event_type),
        from_position = from_position,
        limit = limit,
    );
    Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        table.into_iter().map(|r| row_to_event(&r)).collect()
    })
}

pub fn get_event(id: Uuid) -> EngineResult<AppendedEvent> {
    let sql = format!(
        "SELECT {cols} FROM events.event WHERE id = {id}",
        cols = EVENT_COLUMNS,
        id = sql_literal(&id.to_string()),
    );
    Spi::connect(|client| {
        let table = client.select(&sql, Some(1), &[])?;
        let row = table.first();
        if row.get::<i64>(1)?.is_none() {
            return Err(EngineError::NotFound(format!("event {id} not found")));
        }
        row_to_event(&row)
    })
}

pub fn get_event_at_position(position: i64) -> EngineResult<AppendedEvent> {
    let sql = format!(
        "SELECT {cols} FROM events.event WHERE \"position\" = {position}",
        cols = EVENT_COLUMNS,
        position = position,
    );
    Spi::connect(|client| {
        let table = client.select(&sql, Some(1), &[])?;
        let row = table.first();
        if row.get::<i64>(1)?.is_none() {
            return Err(EngineError::NotFound(format!("no event at position {position}")));
        }
        row_to_event(&row)
    })
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::eventstore::append::append;
    use crate::eventstore::registry::{register_category, register_event_type};

    #[pgrx::pg_test]
    fn read_stream_is_ordered_by_stream_version() {
        register_category("order").unwrap();
        register_event_type("order", "created").unwrap();
        register_event_type("order", "item-added").unwrap();

        let sid = Uuid::from_bytes(*uuid::Uuid::new_v4().as_bytes());
        let empty = serde_json::json!({});
        append(sid, "order", "created", &empty, &empty, Some(-1)).unwrap();
        append(sid, "order", "item-added", &empty, &empty, Some(1)).unwrap();
        append(sid, "order", "item-added", &empty, &empty, Some(2)).unwrap();

        let events = read_stream(sid, 0, 10, "forward").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].stream_version, 1);
        assert_eq!(events[2].stream_version, 3);

        let backward = read_stream(sid, 4, 10, "backward").unwrap();
        assert_eq!(backward.len(), 3);
        assert_eq!(backward[0].stream_version, 3);
    }

    #[pgrx::pg_test]
    fn get_event_at_position_finds_appended_row() {
        register_category("order").unwrap();
        register_event_type("order", "created").unwrap();
        let sid = Uuid::from_bytes(*uuid::Uuid::new_v4().as_bytes());
        let appended = append(
            sid,
            "order",
            "created",
            &serde_json::json!({"k": "v"}),
            &serde_json::json!({}),
            Some(-1),
        )
        .unwrap();

        let fetched = get_event_at_position(appended.position).unwrap();
        assert_eq!(fetched.id, appended.id);
        assert_eq!(fetched.data, serde_json::json!({"k": "v"}));

        let missing = get_event_at_position(appended.position + 1000);
        assert!(missing.is_err());
    }
}
