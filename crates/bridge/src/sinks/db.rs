// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relational database sink. Persists tag reads and other events into
//! whichever of sqlite/mysql/postgres `DATABASE_URL` names, mirroring
//! the source's `DatabaseEngine`/`DbTag`/`DbEvent` (a single
//! `tags`/`events` pair of tables, async-engine-per-dialect, schema
//! created eagerly at startup). `sqlx`'s compile-time-checked `query!`
//! macro is not available without a live database at build time, so
//! every statement here goes through the runtime-checked `sqlx::query`
//! builder instead.

use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, PgPool, SqlitePool};

use crate::config::{parse_database_url, DbDialect};
use crate::error::BridgeError;
use crate::event::{Event, EventData};
use crate::sinks::{Sink, SinkFuture};

fn sink_err(e: sqlx::Error) -> BridgeError {
    BridgeError::Sink(e.to_string())
}

enum Pool {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
    Postgres(PgPool),
}

/// Database-backed sink plus the maintenance queries the pruning task
/// runs against the same tables.
pub struct DbSink {
    pool: Pool,
}

const CREATE_TAGS_SQLITE: &str = "CREATE TABLE IF NOT EXISTS tags (\
    id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TEXT NOT NULL, device TEXT, epc TEXT, tid TEXT, ant INTEGER, rssi INTEGER, gtin TEXT)";
const CREATE_TAGS_MYSQL: &str = "CREATE TABLE IF NOT EXISTS tags (\
    id INTEGER PRIMARY KEY AUTO_INCREMENT, timestamp DATETIME NOT NULL, device VARCHAR(50), epc VARCHAR(50), tid VARCHAR(50), ant INTEGER, rssi INTEGER, gtin VARCHAR(24))";
const CREATE_TAGS_POSTGRES: &str = "CREATE TABLE IF NOT EXISTS tags (\
    id SERIAL PRIMARY KEY, timestamp TIMESTAMPTZ NOT NULL, device VARCHAR(50), epc VARCHAR(50), tid VARCHAR(50), ant INTEGER, rssi INTEGER, gtin VARCHAR(24))";

const CREATE_EVENTS_SQLITE: &str = "CREATE TABLE IF NOT EXISTS events (\
    id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TEXT NOT NULL, device TEXT, event_type TEXT, event_data TEXT)";
const CREATE_EVENTS_MYSQL: &str = "CREATE TABLE IF NOT EXISTS events (\
    id INTEGER PRIMARY KEY AUTO_INCREMENT, timestamp DATETIME NOT NULL, device VARCHAR(50), event_type VARCHAR(50), event_data TEXT)";
const CREATE_EVENTS_POSTGRES: &str = "CREATE TABLE IF NOT EXISTS events (\
    id SERIAL PRIMARY KEY, timestamp TIMESTAMPTZ NOT NULL, device VARCHAR(50), event_type VARCHAR(50), event_data TEXT)";

const TAGS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_tags_device ON tags (device)",
    "CREATE INDEX IF NOT EXISTS idx_tags_epc ON tags (epc)",
    "CREATE INDEX IF NOT EXISTS idx_tags_gtin ON tags (gtin)",
];
const EVENTS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_events_device ON events (device)",
    "CREATE INDEX IF NOT EXISTS idx_events_event_type ON events (event_type)",
];

// MySQL has no `CREATE INDEX IF NOT EXISTS`; duplicate-key errors on
// re-creation are swallowed by the caller instead.
const TAGS_INDEXES_MYSQL: &[&str] = &[
    "CREATE INDEX idx_tags_device ON tags (device)",
    "CREATE INDEX idx_tags_epc ON tags (epc)",
    "CREATE INDEX idx_tags_gtin ON tags (gtin)",
];
const EVENTS_INDEXES_MYSQL: &[&str] = &[
    "CREATE INDEX idx_events_device ON events (device)",
    "CREATE INDEX idx_events_event_type ON events (event_type)",
];

impl DbSink {
    pub async fn connect(database_url: &str) -> Result<Self, BridgeError> {
        let (dialect, url) = parse_database_url(database_url)
            .ok_or_else(|| BridgeError::Config(format!("unsupported DATABASE_URL: {database_url:?}")))?;
        let pool = match dialect {
            DbDialect::Sqlite => Pool::Sqlite(SqlitePool::connect(&url).await.map_err(sink_err)?),
            DbDialect::MySql => Pool::MySql(MySqlPool::connect(&url).await.map_err(sink_err)?),
            DbDialect::Postgres => Pool::Postgres(PgPool::connect(&url).await.map_err(sink_err)?),
        };
        let sink = Self { pool };
        sink.create_tables().await?;
        Ok(sink)
    }

    async fn create_tables(&self) -> Result<(), BridgeError> {
        let (tags_ddl, events_ddl) = match &self.pool {
            Pool::Sqlite(_) => (CREATE_TAGS_SQLITE, CREATE_EVENTS_SQLITE),
            Pool::MySql(_) => (CREATE_TAGS_MYSQL, CREATE_EVENTS_MYSQL),
            Pool::Postgres(_) => (CREATE_TAGS_POSTGRES, CREATE_EVENTS_POSTGRES),
        };
        match &self.pool {
            Pool::Sqlite(pool) => {
                sqlx::query(tags_ddl).execute(pool).await.map_err(sink_err)?;
                sqlx::query(events_ddl).execute(pool).await.map_err(sink_err)?;
                for stmt in TAGS_INDEXES.iter().chain(EVENTS_INDEXES) {
                    sqlx::query(stmt).execute(pool).await.map_err(sink_err)?;
                }
            }
            Pool::MySql(pool) => {
                sqlx::query(tags_ddl).execute(pool).await.map_err(sink_err)?;
                sqlx::query(events_ddl).execute(pool).await.map_err(sink_err)?;
                for stmt in TAGS_INDEXES_MYSQL.iter().chain(EVENTS_INDEXES_MYSQL) {
                    if let Err(e) = sqlx::query(stmt).execute(pool).await {
                        if !e.to_string().to_lowercase().contains("duplicate") {
                            return Err(sink_err(e));
                        }
                    }
                }
            }
            Pool::Postgres(pool) => {
                sqlx::query(tags_ddl).execute(pool).await.map_err(sink_err)?;
                sqlx::query(events_ddl).execute(pool).await.map_err(sink_err)?;
                for stmt in TAGS_INDEXES.iter().chain(EVENTS_INDEXES) {
                    sqlx::query(stmt).execute(pool).await.map_err(sink_err)?;
                }
            }
        }
        Ok(())
    }

    async fn insert_tag(&self, event: &Event, tag: &crate::event::Tag) -> Result<(), BridgeError> {
        match &self.pool {
            Pool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO tags (timestamp, device, epc, tid, ant, rssi, gtin) VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(tag.timestamp)
                .bind(&tag.device)
                .bind(&tag.epc)
                .bind(&tag.tid)
                .bind(tag.ant)
                .bind(tag.rssi)
                .bind(&tag.gtin)
                .execute(pool)
                .await
                .map_err(sink_err)?;
            }
            Pool::MySql(pool) => {
                sqlx::query(
                    "INSERT INTO tags (timestamp, device, epc, tid, ant, rssi, gtin) VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(tag.timestamp)
                .bind(&tag.device)
                .bind(&tag.epc)
                .bind(&tag.tid)
                .bind(tag.ant)
                .bind(tag.rssi)
                .bind(&tag.gtin)
                .execute(pool)
                .await
                .map_err(sink_err)?;
            }
            Pool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO tags (timestamp, device, epc, tid, ant, rssi, gtin) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(tag.timestamp)
                .bind(&tag.device)
                .bind(&tag.epc)
                .bind(&tag.tid)
                .bind(tag.ant)
                .bind(tag.rssi)
                .bind(&tag.gtin)
                .execute(pool)
                .await
                .map_err(sink_err)?;
            }
        }
        let _ = event;
        Ok(())
    }

    async fn insert_event(&self, event: &Event, event_data: String) -> Result<(), BridgeError> {
        match &self.pool {
            Pool::Sqlite(pool) => {
                sqlx::query("INSERT INTO events (timestamp, device, event_type, event_data) VALUES (?, ?, ?, ?)")
                    .bind(event.timestamp)
                    .bind(&event.device)
                    .bind(&event.event_type)
                    .bind(event_data)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
            }
            Pool::MySql(pool) => {
                sqlx::query("INSERT INTO events (timestamp, device, event_type, event_data) VALUES (?, ?, ?, ?)")
                    .bind(event.timestamp)
                    .bind(&event.device)
                    .bind(&event.event_type)
                    .bind(event_data)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
            }
            Pool::Postgres(pool) => {
                sqlx::query("INSERT INTO events (timestamp, device, event_type, event_data) VALUES ($1, $2, $3, $4)")
                    .bind(event.timestamp)
                    .bind(&event.device)
                    .bind(&event.event_type)
                    .bind(event_data)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
            }
        }
        Ok(())
    }

    /// Delete every row older than `cutoff` from both tables. Returns
    /// the total number of rows deleted, used by the maintenance task's
    /// nightly pruning sweep.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, BridgeError> {
        let (tags_deleted, events_deleted) = match &self.pool {
            Pool::Sqlite(pool) => {
                let t = sqlx::query("DELETE FROM tags WHERE timestamp < ?")
                    .bind(cutoff)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
                let e = sqlx::query("DELETE FROM events WHERE timestamp < ?")
                    .bind(cutoff)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
                (t.rows_affected(), e.rows_affected())
            }
            Pool::MySql(pool) => {
                let t = sqlx::query("DELETE FROM tags WHERE timestamp < ?")
                    .bind(cutoff)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
                let e = sqlx::query("DELETE FROM events WHERE timestamp < ?")
                    .bind(cutoff)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
                (t.rows_affected(), e.rows_affected())
            }
            Pool::Postgres(pool) => {
                let t = sqlx::query("DELETE FROM tags WHERE timestamp < $1")
                    .bind(cutoff)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
                let e = sqlx::query("DELETE FROM events WHERE timestamp < $1")
                    .bind(cutoff)
                    .execute(pool)
                    .await
                    .map_err(sink_err)?;
                (t.rows_affected(), e.rows_affected())
            }
        };
        Ok(tags_deleted + events_deleted)
    }

    /// Render the `tags` table as CSV rows. The report API's ZIP/HTTP
    /// delivery lives outside the core; this is the exportable artifact
    /// that layer packages.
    pub async fn export_tags_csv(&self) -> Result<String, BridgeError> {
        let header = ["id", "timestamp", "device", "epc", "tid", "ant", "rssi", "gtin"];
        let query = "SELECT id, timestamp, device, epc, tid, ant, rssi, gtin FROM tags ORDER BY id";
        let mut out = csv_header(&header);
        match &self.pool {
            Pool::Sqlite(pool) => {
                use sqlx::Row;
                for row in sqlx::query(query).fetch_all(pool).await.map_err(sink_err)? {
                    csv_row(
                        &mut out,
                        &[
                            row.try_get::<i64, _>("id").map_err(sink_err)?.to_string(),
                            row.try_get::<DateTime<Utc>, _>("timestamp").map_err(sink_err)?.to_rfc3339(),
                            row.try_get::<Option<String>, _>("device").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("epc").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("tid").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<i64>, _>("ant").map_err(sink_err)?.map(|v| v.to_string()).unwrap_or_default(),
                            row.try_get::<Option<i64>, _>("rssi").map_err(sink_err)?.map(|v| v.to_string()).unwrap_or_default(),
                            row.try_get::<Option<String>, _>("gtin").map_err(sink_err)?.unwrap_or_default(),
                        ],
                    );
                }
            }
            Pool::MySql(pool) => {
                use sqlx::Row;
                for row in sqlx::query(query).fetch_all(pool).await.map_err(sink_err)? {
                    csv_row(
                        &mut out,
                        &[
                            row.try_get::<i64, _>("id").map_err(sink_err)?.to_string(),
                            row.try_get::<DateTime<Utc>, _>("timestamp").map_err(sink_err)?.to_rfc3339(),
                            row.try_get::<Option<String>, _>("device").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("epc").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("tid").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<i64>, _>("ant").map_err(sink_err)?.map(|v| v.to_string()).unwrap_or_default(),
                            row.try_get::<Option<i64>, _>("rssi").map_err(sink_err)?.map(|v| v.to_string()).unwrap_or_default(),
                            row.try_get::<Option<String>, _>("gtin").map_err(sink_err)?.unwrap_or_default(),
                        ],
                    );
                }
            }
            Pool::Postgres(pool) => {
                use sqlx::Row;
                for row in sqlx::query(query).fetch_all(pool).await.map_err(sink_err)? {
                    csv_row(
                        &mut out,
                        &[
                            row.try_get::<i32, _>("id").map_err(sink_err)?.to_string(),
                            row.try_get::<DateTime<Utc>, _>("timestamp").map_err(sink_err)?.to_rfc3339(),
                            row.try_get::<Option<String>, _>("device").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("epc").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("tid").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<i32>, _>("ant").map_err(sink_err)?.map(|v| v.to_string()).unwrap_or_default(),
                            row.try_get::<Option<i32>, _>("rssi").map_err(sink_err)?.map(|v| v.to_string()).unwrap_or_default(),
                            row.try_get::<Option<String>, _>("gtin").map_err(sink_err)?.unwrap_or_default(),
                        ],
                    );
                }
            }
        }
        Ok(out)
    }

    /// Render the `events` table as CSV rows, same contract as
    /// [`Self::export_tags_csv`].
    pub async fn export_events_csv(&self) -> Result<String, BridgeError> {
        let header = ["id", "timestamp", "device", "event_type", "event_data"];
        let query = "SELECT id, timestamp, device, event_type, event_data FROM events ORDER BY id";
        let mut out = csv_header(&header);
        match &self.pool {
            Pool::Sqlite(pool) => {
                use sqlx::Row;
                for row in sqlx::query(query).fetch_all(pool).await.map_err(sink_err)? {
                    csv_row(
                        &mut out,
                        &[
                            row.try_get::<i64, _>("id").map_err(sink_err)?.to_string(),
                            row.try_get::<DateTime<Utc>, _>("timestamp").map_err(sink_err)?.to_rfc3339(),
                            row.try_get::<Option<String>, _>("device").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("event_type").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("event_data").map_err(sink_err)?.unwrap_or_default(),
                        ],
                    );
                }
            }
            Pool::MySql(pool) => {
                use sqlx::Row;
                for row in sqlx::query(query).fetch_all(pool).await.map_err(sink_err)? {
                    csv_row(
                        &mut out,
                        &[
                            row.try_get::<i64, _>("id").map_err(sink_err)?.to_string(),
                            row.try_get::<DateTime<Utc>, _>("timestamp").map_err(sink_err)?.to_rfc3339(),
                            row.try_get::<Option<String>, _>("device").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("event_type").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("event_data").map_err(sink_err)?.unwrap_or_default(),
                        ],
                    );
                }
            }
            Pool::Postgres(pool) => {
                use sqlx::Row;
                for row in sqlx::query(query).fetch_all(pool).await.map_err(sink_err)? {
                    csv_row(
                        &mut out,
                        &[
                            row.try_get::<i32, _>("id").map_err(sink_err)?.to_string(),
                            row.try_get::<DateTime<Utc>, _>("timestamp").map_err(sink_err)?.to_rfc3339(),
                            row.try_get::<Option<String>, _>("device").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("event_type").map_err(sink_err)?.unwrap_or_default(),
                            row.try_get::<Option<String>, _>("event_data").map_err(sink_err)?.unwrap_or_default(),
                        ],
                    );
                }
            }
        }
        Ok(out)
    }
}

fn csv_header(fields: &[&str]) -> String {
    let mut out = String::new();
    out.push_str(&fields.join(","));
    out.push_str("\r\n");
    out
}

/// Append one CSV record, quoting any field that contains a comma,
/// quote, or newline (RFC 4180 minimal escaping; no crate in this
/// corpus covers it, same call as the hand-rolled CRC/GTIN decoders).
fn csv_row(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains(['"', ',', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}

impl Sink for DbSink {
    fn name(&self) -> &'static str {
        "db"
    }

    fn publish<'a>(&'a self, event: &'a Event) -> SinkFuture<'a> {
        Box::pin(async move {
            match &event.event_data {
                EventData::Tag(tag) => self.insert_tag(event, tag).await,
                EventData::Bool(b) => self.insert_event(event, b.to_string()).await,
                EventData::Text(text) => self.insert_event(event, text.clone()).await,
            }
        })
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
