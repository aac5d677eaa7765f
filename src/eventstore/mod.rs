pub mod aggregates;
pub mod append;
pub mod catalog;
pub mod projections;
pub mod read;
pub mod registry;
pub mod subscriptions;
pub mod types;

use pgrx::iter::TableIterator;
use pgrx::prelude::*;
use pgrx::{JsonB, Uuid};

use crate::eventstore::types::AppendedEvent;

fn event_tuple(
    e: AppendedEvent,
) -> (
    i64,
    Uuid,
    Uuid,
    i64,
    String,
    String,
    JsonB,
    JsonB,
    String,
) {
    (
        e.position,
        e.id,
        e.stream,
        e.stream_version,
        e.category,
        e.event_type,
        JsonB(e.data),
        JsonB(e.metadata),
        e.created_at,
    )
}

#[pg_extern]
fn events_register_category(category: &str) {
    ok_or_pg_error!(registry::register_category(category))
}

#[pg_extern]
fn events_register_event_type(category: &str, event_type: &str) {
    ok_or_pg_error!(registry::register_event_type(category, event_type))
}

#[pg_extern]
fn events_unregister_category(category: &str) {
    ok_or_pg_error!(registry::unregister_category(category))
}

#[pg_extern]
fn events_list_categories() -> TableIterator<'static, (name!(id, String),)> {
    let cats = ok_or_pg_error!(registry::list_categories());
    TableIterator::new(cats.into_iter().map(|c| (c,)))
}

#[pg_extern]
fn events_list_event_types(category: &str) -> TableIterator<'static, (name!(id, String),)> {
    let types = ok_or_pg_error!(registry::list_event_types(category));
    TableIterator::new(types.into_iter().map(|t| (t,)))
}

#[pg_extern]
fn events_append(
    stream_id: Uuid,
    category: &str,
    event_type: &str,
    data: default!(JsonB, "'{}'"),
    metadata: default!(JsonB, "'{}'"),
    expected_version: Option<i64>,
) -> TableIterator<'static, (
    name!(position, i64),
    name!(id, Uuid),
    name!(stream, Uuid),
    name!(stream_version, i64),
    name!(category, String),
    name!(event_type, String),
    name!(data, JsonB),
    name!(metadata, JsonB),
    name!(created_at, String),
)> {
    let event = ok_or_pg_error!(append::append_json(
        stream_id,
        category,
        event_type,
        data,
        metadata,
        expected_version
    ));
    TableIterator::new(std::iter::once(event_tuple(event)))
}

#[pg_extern]
fn events_read_stream(
    stream: Uuid,
    from_version: default!(i64, 0),
    limit: default!(i64, 100),
    direction: default!(&str, "'forward'"),
) -> TableIterator<'static, (
    name!(position, i64),
    name!(id, Uuid),
    name!(stream, Uuid),
    name!(stream_version, i64),
    name!(category, String),
    name!(event_type, String),
    name!(data, JsonB),
    name!(metadata, JsonB),
    name!(created_at, String),
)> {
    let events = ok_or_pg_error!(read::read_stream(stream, from_version, limit, direction));
    TableIterator::new(events.into_iter().map(event_tuple))
}

#[pg_extern]
fn events_read_all(
    from_position: default!(i64, 0),
    limit: default!(i64, 100),
    filter_types: default!(Option<Vec<String>>, "NULL"),
    filter_streams: default!(Option<Vec<Uuid>>, "NULL"),
) -> TableIterator<'static, (
    name!(position, i64),
    name!(id, Uuid),
    name!(stream, Uuid),
    name!(stream_version, i64),
    name!(category, String),
    name!(event_type, String),
    name!(data, JsonB),
    name!(metadata, JsonB),
    name!(created_at, String),
)> {
    let events = ok_or_pg_error!(read::read_all(
        from_position,
        limit,
        filter_types.as_deref(),
        filter_streams.as_deref(),
    ));
    TableIterator::new(events.into_iter().map(event_tuple))
}

#[pg_extern]
fn events_read_by_category(
    category: &str,
    from_position: default!(i64, 0),
    limit: default!(i64, 100),
) -> TableIterator<'static, (
    name!(position, i64),
    name!(id, Uuid),
    name!(stream, Uuid),
    name!(stream_version, i64),
    name!(category, String),
    name!(event_type, String),
    name!(data, JsonB),
    name!(metadata, JsonB),
    name!(created_at, String),
)> {
    let events = ok_or_pg_error!(read::read_by_category(category, from_position, limit));
    TableIterator::new(events.into_iter().map(event_tuple))
}

#[pg_extern]
fn events_read_by_type(
    category: &str,
    event_type: &str,
    from_position: default!(i64, 0),
    limit: default!(i64, 100),
) -> TableIterator<'static, (
    name!(position, i64),
    name!(id, Uuid),
    name!(stream, Uuid),
    name!(stream_version, i64),
    name!(category, String),
    name!(event_type, String),
    name!(data, JsonB),
    name!(metadata, JsonB),
    name!(created_at, String),
)> {
    let events = ok_or_pg_error!(read::read_by_type(category, event_type, from_position, limit));
    TableIterator::new(events.into_iter().map(event_tuple))
}

#[pg_extern]
fn events_get_event(id: Uuid) -> TableIterator<'static, (
    name!(position, i64),
    name!(id, Uuid),
    name!(stream, Uuid),
    name!(stream_version, i64),
    name!(category, String),
    name!(event_type, String),
    name!(data, JsonB),
    name!(metadata, JsonB),
    name!(created_at, String),
)> {
    let event = ok_or_pg_error!(read::get_event(id));
    TableIterator::new(std::iter::once(event_tuple(event)))
}

#[pg_extern]
fn events_get_event_at_position(position: i64) -> TableIterator<'static, (
    name!(position, i64),
    name!(id, Uuid),
    name!(stream, Uuid),
    name!(stream_version, i64),
    name!(category, String),
    name!(event_type, String),
    name!(data, JsonB),
    name!(metadata, JsonB),
    name!(created_at, String),
)> {
    let event = ok_or_pg_error!(read::get_event_at_position(position));
    TableIterator::new(std::iter::once(event_tuple(event)))
}

#[pg_extern]
fn events_create_subscription(name: &str, filter_types: Option<JsonB>, filter_streams: Option<JsonB>) {
    ok_or_pg_error!(subscriptions::create_subscription(
        name,
        filter_types.as_ref().map(|j| &j.0),
        filter_streams.as_ref().map(|j| &j.0),
    ))
}

#[pg_extern]
fn events_delete_subscription(name: &str) {
    ok_or_pg_error!(subscriptions::delete_subscription(name))
}

#[pg_extern]
fn events_list_subscriptions() -> TableIterator<'static, (name!(name, String),)> {
    let names = ok_or_pg_error!(subscriptions::list_subscriptions());
    TableIterator::new(names.into_iter().map(|n| (n,)))
}

#[pg_extern]
fn events_get_subscription(name: &str) -> TableIterator<'static, (name!(last_position, i64), name!(active, bool))> {
    let (last_position, active) = ok_or_pg_error!(subscriptions::get_subscription(name));
    TableIterator::new(std::iter::once((last_position, active)))
}

#[pg_extern]
fn events_poll(
    subscription: &str,
    batch_size: default!(i64, 100),
    claim_timeout_seconds: Option<i64>,
) -> TableIterator<'static, (
    name!(position, i64),
    name!(id, Uuid),
    name!(stream, Uuid),
    name!(stream_version, i64),
    name!(category, String),
    name!(event_type, String),
    name!(data, JsonB),
    name!(metadata, JsonB),
    name!(created_at, String),
)> {
    let events = ok_or_pg_error!(subscriptions::poll(subscription, batch_size, claim_timeout_seconds));
    TableIterator::new(events.into_iter().map(event_tuple))
}

#[pg_extern]
fn events_ack(subscription: &str, position: i64) {
    ok_or_pg_error!(subscriptions::ack(subscription, position))
}

#[pg_extern]
fn events_cleanup_expired_claims() -> i64 {
    ok_or_pg_error!(subscriptions::cleanup_expired_claims()) as i64
}

#[pg_extern]
fn events_cleanup_subscription_claims(name: &str) -> i64 {
    ok_or_pg_error!(subscriptions::cleanup_subscription_claims(name)) as i64
}

#[pg_extern]
fn events_register_projection(name: &str, sync_handlers: JsonB, async_types: JsonB) {
    let handlers = sync_handlers.0.as_object().cloned().unwrap_or_default();
    let types: Vec<String> = async_types
        .0
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    ok_or_pg_error!(projections::register_projection(name, &handlers, &types))
}

#[pg_extern]
fn events_list_projections() -> TableIterator<
    'static,
    (
        name!(name, String),
        name!(sync_types, JsonB),
        name!(async_types, JsonB),
        name!(trigger_name, Option<String>),
        name!(subscription_name, Option<String>),
        name!(events_behind, i64),
    ),
> {
    let statuses = ok_or_pg_error!(projections::list_projections());
    TableIterator::new(statuses.into_iter().map(|s| {
        (
            s.name,
            JsonB(serde_json::Value::Array(s.sync_types.into_iter().map(serde_json::Value::String).collect())),
            JsonB(serde_json::Value::Array(s.async_types.into_iter().map(serde_json::Value::String).collect())),
            s.trigger_name,
            s.subscription_name,
            s.events_behind,
        )
    }))
}

#[pg_extern]
fn events_register_aggregate(
    name: &str,
    function_name: &str,
    category: &str,
    initial_state: JsonB,
    reducers: JsonB,
    snapshot_threshold: Option<i32>,
) {
    let reducers = reducers.0.as_object().cloned().unwrap_or_default();
    ok_or_pg_error!(aggregates::register_aggregate(
        name,
        function_name,
        category,
        &initial_state.0,
        &reducers,
        snapshot_threshold,
    ))
}

#[pg_extern]
fn events_load_aggregate(
    name: &str,
    stream_id: Uuid,
) -> TableIterator<'static, (name!(stream_id, Uuid), name!(state, JsonB), name!(version, i64))> {
    let state = ok_or_pg_error!(aggregates::load_aggregate(name, stream_id));
    TableIterator::new(std::iter::once((state.stream_id, JsonB(state.state), state.version)))
}

#[pg_extern]
fn events_list_aggregates() -> TableIterator<'static, (name!(name, String),)> {
    let names = ok_or_pg_error!(catalog::list_aggregates());
    TableIterator::new(names.into_iter().map(|n| (n,)))
}

#[pg_extern]
fn events_get_aggregate_def(name: &str) -> JsonB {
    let def = ok_or_pg_error!(catalog::get_aggregate_def(name));
    JsonB(serde_json::to_value(&def).unwrap_or(serde_json::Value::Null))
}

#[pg_extern]
fn events_save_snapshot(stream: Uuid, name: default!(&str, "'aggregate-state'"), version: i64, state: JsonB) {
    ok_or_pg_error!(aggregates::save_snapshot(stream, name, version, &state.0))
}

#[pg_extern]
fn events_get_snapshot(
    stream: Uuid,
    name: default!(&str, "'aggregate-state'"),
) -> TableIterator<'static, (name!(version, i64), name!(state, JsonB))> {
    match ok_or_pg_error!(aggregates::get_snapshot(stream, name)) {
        Some((version, state)) => TableIterator::new(std::iter::once((version, JsonB(state)))),
        None => TableIterator::new(std::iter::empty()),
    }
}
