//! SQLite-backed event queue.
//!
//! # Responsibility
//! - Persist events with a monotonically increasing stamp.
//! - Serve filtered reads, the latest event and the queue size.
//! - Delete events older than a retention window.
//!
//! # Invariants
//! - Reads are ordered by `stamp ASC` (ties broken by `id ASC`).
//! - Every read carries the configured read table hint; deletes never do.
//! - Retention compares against `created`, not against `stamp`.

use crate::clock::{Clock, SystemClock};
use crate::db::SqlDialect;
use crate::repo::error::{StoreError, StoreResult};
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::Arc;
use std::time::Duration;

const EVENT_COLUMNS: &str = "{id}, {event_type}, {instance_type}, {instance_data}, {instance_name}, {user_name}, {stamp}, {created}";

const INSERT_EVENT_SQL: &str = "INSERT INTO {event_queue} ({event_type}, {instance_type}, {instance_data}, {instance_name}, {user_name}, {stamp}, {created})
     SELECT ?1, ?2, ?3, ?4, ?5, COALESCE(MAX({stamp}), 0) + 1, ?6
     FROM {event_queue};";

/// One persisted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub id: i64,
    pub event_type: String,
    pub instance_type: String,
    /// Serialized event payload; opaque to the queue.
    pub instance_data: String,
    /// Instance that raised the event.
    pub instance_name: String,
    pub user_name: String,
    /// Queue position; strictly increasing in insert order.
    pub stamp: i64,
    /// Unix epoch milliseconds at enqueue.
    pub created: i64,
}

/// Event to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub event_type: String,
    pub instance_type: String,
    pub instance_data: String,
    pub instance_name: String,
    pub user_name: String,
}

impl NewEvent {
    pub fn new(
        event_type: impl Into<String>,
        instance_data: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            instance_type: event_type.clone(),
            event_type,
            instance_data: instance_data.into(),
            instance_name: instance_name.into(),
            user_name: String::new(),
        }
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self
    }
}

/// Read criteria. Unset criteria do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQueueQuery {
    pub event_type: Option<String>,
    pub instance_name: Option<String>,
    /// Only events with `stamp > from_stamp`.
    pub from_stamp: Option<i64>,
    /// Only events with `created >= from_time` (epoch ms).
    pub from_time: Option<i64>,
    /// Only events with `created < to_time` (epoch ms).
    pub to_time: Option<i64>,
}

impl EventQueueQuery {
    pub fn after_stamp(stamp: i64) -> Self {
        Self {
            from_stamp: Some(stamp),
            ..Self::default()
        }
    }

    fn criteria(&self) -> (Vec<&'static str>, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut bind_values = Vec::new();
        if let Some(event_type) = &self.event_type {
            conditions.push("{event_type} = ?");
            bind_values.push(Value::Text(event_type.clone()));
        }
        if let Some(instance_name) = &self.instance_name {
            conditions.push("{instance_name} = ?");
            bind_values.push(Value::Text(instance_name.clone()));
        }
        if let Some(from_stamp) = self.from_stamp {
            conditions.push("{stamp} > ?");
            bind_values.push(Value::Integer(from_stamp));
        }
        if let Some(from_time) = self.from_time {
            conditions.push("{created} >= ?");
            bind_values.push(Value::Integer(from_time));
        }
        if let Some(to_time) = self.to_time {
            conditions.push("{created} < ?");
            bind_values.push(Value::Integer(to_time));
        }
        (conditions, bind_values)
    }
}

/// Cross-instance event queue.
pub trait EventQueue {
    /// Appends an event and returns its stored form.
    fn queue_event(&self, event: &NewEvent) -> StoreResult<QueuedEvent>;
    fn get_queued_events(&self, query: &EventQueueQuery) -> StoreResult<Vec<QueuedEvent>>;
    /// Event with the highest stamp, if any.
    fn get_last_event(&self) -> StoreResult<Option<QueuedEvent>>;
    fn get_queued_event_count(&self) -> StoreResult<i64>;
    /// Deletes events created more than `minutes_to_keep` minutes ago.
    /// Returns the number of deleted events.
    fn cleanup(&self, minutes_to_keep: u32) -> StoreResult<usize> {
        self.cleanup_older_than(Duration::from_secs(u64::from(minutes_to_keep) * 60))
    }
    /// Deletes events created more than `keep` ago.
    fn cleanup_older_than(&self, keep: Duration) -> StoreResult<usize>;
}

pub struct SqliteEventQueue<'conn> {
    conn: &'conn Connection,
    dialect: &'conn SqlDialect,
    clock: Arc<dyn Clock>,
}

impl<'conn> SqliteEventQueue<'conn> {
    pub fn new(conn: &'conn Connection, dialect: &'conn SqlDialect) -> Self {
        Self::with_clock(conn, dialect, Arc::new(SystemClock))
    }

    pub fn with_clock(
        conn: &'conn Connection,
        dialect: &'conn SqlDialect,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            conn,
            dialect,
            clock,
        }
    }

    fn select_events(
        &self,
        where_clause: &str,
        order_limit: &str,
        bind_values: Vec<Value>,
    ) -> StoreResult<Vec<QueuedEvent>> {
        let sql = self.dialect.render_read(&format!(
            "SELECT {EVENT_COLUMNS} FROM {{event_queue}}%HINT%{where_clause} {order_limit};"
        ));
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }
        Ok(events)
    }
}

impl EventQueue for SqliteEventQueue<'_> {
    fn queue_event(&self, event: &NewEvent) -> StoreResult<QueuedEvent> {
        let created = self.clock.now_millis();
        self.conn.execute(
            &self.dialect.render(INSERT_EVENT_SQL),
            params![
                event.event_type.as_str(),
                event.instance_type.as_str(),
                event.instance_data.as_str(),
                event.instance_name.as_str(),
                event.user_name.as_str(),
                created
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        let stored = self
            .conn
            .query_row(
                &self.dialect.render(&format!(
                    "SELECT {EVENT_COLUMNS} FROM {{event_queue}} WHERE {{id}} = ?1;"
                )),
                params![id],
                parse_event_row,
            )
            .optional()?;
        stored.ok_or_else(|| {
            StoreError::InvalidData(format!("event {id} vanished right after insert"))
        })
    }

    fn get_queued_events(&self, query: &EventQueueQuery) -> StoreResult<Vec<QueuedEvent>> {
        let (conditions, bind_values) = query.criteria();
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        self.select_events(&where_clause, "ORDER BY {stamp} ASC, {id} ASC", bind_values)
    }

    fn get_last_event(&self) -> StoreResult<Option<QueuedEvent>> {
        let mut events =
            self.select_events("", "ORDER BY {stamp} DESC, {id} DESC LIMIT 1", Vec::new())?;
        Ok(events.pop())
    }

    fn get_queued_event_count(&self) -> StoreResult<i64> {
        let count = self.conn.query_row(
            &self
                .dialect
                .render_read("SELECT COUNT(*) FROM {event_queue}%HINT%;"),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn cleanup_older_than(&self, keep: Duration) -> StoreResult<usize> {
        let keep_ms = i64::try_from(keep.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now_millis().saturating_sub(keep_ms);
        let deleted = self.conn.execute(
            &self
                .dialect
                .render("DELETE FROM {event_queue} WHERE {created} < ?1;"),
            params![cutoff],
        )?;
        info!(
            "event=event_queue_cleanup module=events status=ok keep_ms={} cutoff={} deleted={}",
            keep_ms, cutoff, deleted
        );
        Ok(deleted)
    }
}

fn parse_event_row(row: &Row<'_>) -> rusqlite::Result<QueuedEvent> {
    Ok(QueuedEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        instance_type: row.get(2)?,
        instance_data: row.get(3)?,
        instance_name: row.get(4)?,
        user_name: row.get(5)?,
        stamp: row.get(6)?,
        created: row.get(7)?,
    })
}
