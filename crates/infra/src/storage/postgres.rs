//! Postgres-backed storage.
//!
//! The storage contracts are synchronous while `sqlx` is async. Every call is
//! bridged with `Handle::block_on` on the runtime handle captured at
//! construction, so calls must come from a thread that may block (a
//! `spawn_blocking` worker, or a plain thread), never from an async task.
//!
//! ## Error Mapping
//!
//! | Failure | QueueError |
//! |---------|------------|
//! | conditional UPDATE matched no row | `SaveConflict` |
//! | lease UPDATE matched no row | `LeaseConflict` |
//! | unreadable JSON column | `Deserialization` |
//! | any other sqlx error | `StorageUnavailable` |

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tokio::runtime::Handle;
use uuid::Uuid;

use shipq_core::{
    Condition, Direction, FilterValue, Operator, ProcessId, QueryFilter, QueueError, QueueItemId,
    QueueResult, RunnerGuid, ScheduleId, WritePrecondition,
};
use shipq_tasks::TaskPayload;

use super::{ProcessStorage, QueueStorage, RunnerStatusStorage, ScheduleStorage};
use crate::process::Process;
use crate::queue::QueueItem;
use crate::runner::RunnerStatus;
use crate::scheduler::Schedule;

/// Idempotent schema bootstrap.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_items (
    id UUID PRIMARY KEY,
    status TEXT NOT NULL,
    context TEXT NOT NULL,
    queue_name TEXT NOT NULL,
    task_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    progress_base_points BIGINT NOT NULL,
    last_execution_progress_base_points BIGINT NOT NULL,
    retries BIGINT NOT NULL,
    failure_description TEXT,
    create_timestamp TIMESTAMPTZ NOT NULL,
    queue_timestamp TIMESTAMPTZ,
    start_timestamp TIMESTAMPTZ,
    finish_timestamp TIMESTAMPTZ,
    fail_timestamp TIMESTAMPTZ,
    earliest_start_timestamp TIMESTAMPTZ,
    last_update_timestamp TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS queue_items_status_queue ON queue_items (status, queue_name, queue_timestamp);
CREATE INDEX IF NOT EXISTS queue_items_task_type ON queue_items (task_type, context);

CREATE TABLE IF NOT EXISTS schedules (
    id UUID PRIMARY KEY,
    queue_name TEXT NOT NULL,
    context TEXT NOT NULL,
    task_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    recurrence JSONB NOT NULL,
    next_schedule_timestamp TIMESTAMPTZ,
    recurring BOOLEAN NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS processes (
    id UUID PRIMARY KEY,
    runnable JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS runner_status (
    id SMALLINT PRIMARY KEY,
    guid UUID,
    alive_since TIMESTAMPTZ
);
INSERT INTO runner_status (id, guid, alive_since) VALUES (1, NULL, NULL) ON CONFLICT (id) DO NOTHING;
"#;

const QUEUE_COLUMNS: &[&str] = &[
    "id",
    "status",
    "context",
    "queue_name",
    "task_type",
    "progress_base_points",
    "last_execution_progress_base_points",
    "retries",
    "failure_description",
    "create_timestamp",
    "queue_timestamp",
    "start_timestamp",
    "finish_timestamp",
    "fail_timestamp",
    "earliest_start_timestamp",
    "last_update_timestamp",
];

const SCHEDULE_COLUMNS: &[&str] = &[
    "id",
    "queue_name",
    "context",
    "task_type",
    "next_schedule_timestamp",
    "created_at",
];

const QUEUE_SELECT: &str = "SELECT id, status, context, queue_name, task_type, payload, \
    progress_base_points, last_execution_progress_base_points, retries, failure_description, \
    create_timestamp, queue_timestamp, start_timestamp, finish_timestamp, fail_timestamp, \
    earliest_start_timestamp, last_update_timestamp FROM queue_items";

const SCHEDULE_SELECT: &str = "SELECT id, queue_name, context, task_type, payload, recurrence, \
    next_schedule_timestamp, recurring, created_at FROM schedules";

// $18/$19 are only referenced by the conditional variant.
const UPSERT_ITEM: &str = r#"
    INSERT INTO queue_items (
        id, status, context, queue_name, task_type, payload,
        progress_base_points, last_execution_progress_base_points, retries, failure_description,
        create_timestamp, queue_timestamp, start_timestamp, finish_timestamp, fail_timestamp,
        earliest_start_timestamp, last_update_timestamp
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
    ON CONFLICT (id) DO UPDATE SET
        status = EXCLUDED.status,
        context = EXCLUDED.context,
        queue_name = EXCLUDED.queue_name,
        task_type = EXCLUDED.task_type,
        payload = EXCLUDED.payload,
        progress_base_points = EXCLUDED.progress_base_points,
        last_execution_progress_base_points = EXCLUDED.last_execution_progress_base_points,
        retries = EXCLUDED.retries,
        failure_description = EXCLUDED.failure_description,
        queue_timestamp = EXCLUDED.queue_timestamp,
        start_timestamp = EXCLUDED.start_timestamp,
        finish_timestamp = EXCLUDED.finish_timestamp,
        fail_timestamp = EXCLUDED.fail_timestamp,
        earliest_start_timestamp = EXCLUDED.earliest_start_timestamp,
        last_update_timestamp = EXCLUDED.last_update_timestamp
    WHERE $18::text IS NULL AND $19::timestamptz IS NULL
"#;

const UPDATE_ITEM_IF: &str = r#"
    UPDATE queue_items SET
        status = $2,
        context = $3,
        queue_name = $4,
        task_type = $5,
        payload = $6,
        progress_base_points = $7,
        last_execution_progress_base_points = $8,
        retries = $9,
        failure_description = $10,
        create_timestamp = $11,
        queue_timestamp = $12,
        start_timestamp = $13,
        finish_timestamp = $14,
        fail_timestamp = $15,
        earliest_start_timestamp = $16,
        last_update_timestamp = $17
    WHERE id = $1
        AND ($18::text IS NULL OR status = $18)
        AND ($19::timestamptz IS NULL OR last_update_timestamp = $19)
"#;

/// Every storage contract on one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    handle: Handle,
}

impl PostgresStorage {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Connect and bootstrap the schema. Must be awaited inside a tokio runtime.
    pub async fn connect(database_url: &str) -> QueueResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let storage = Self::new(pool, Handle::current());
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    fn block_on<F, T>(&self, future: F) -> QueueResult<T>
    where
        F: std::future::Future<Output = QueueResult<T>>,
    {
        self.handle.block_on(future)
    }

    async fn fetch_items(&self, sql: String, values: Vec<FilterValue>) -> QueueResult<Vec<QueueItem>> {
        let rows = bind_values(sqlx::query(&sql), values)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("select queue_items", e))?;
        rows.iter().map(item_from_row).collect()
    }

    async fn write_item(&self, item: &QueueItem, precondition: Option<WritePrecondition>) -> QueueResult<()> {
        let sql = if precondition.is_some() { UPDATE_ITEM_IF } else { UPSERT_ITEM };
        let (status, last_update) = precondition
            .map(|p| (p.status.map(|s| s.as_str()), p.last_update))
            .unwrap_or_default();

        let result = sqlx::query(sql)
            .bind(item.id.as_uuid())
            .bind(item.status.as_str())
            .bind(&item.context)
            .bind(&item.queue_name)
            .bind(&item.task.task_type)
            .bind(&item.task.payload)
            .bind(i64::from(item.progress_base_points))
            .bind(i64::from(item.last_execution_progress_base_points))
            .bind(i64::from(item.retries))
            .bind(item.failure_description.as_deref())
            .bind(item.create_timestamp)
            .bind(item.queue_timestamp)
            .bind(item.start_timestamp)
            .bind(item.finish_timestamp)
            .bind(item.fail_timestamp)
            .bind(item.earliest_start_timestamp)
            .bind(item.last_update_timestamp)
            .bind(status)
            .bind(last_update)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("save queue_item", e))?;

        if precondition.is_none() || result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM queue_items WHERE id = $1")
            .bind(item.id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("save_conditional", e))?;
        match exists {
            None => Err(QueueError::not_found(item.id.to_string())),
            Some(_) => Err(QueueError::save_conflict(format!(
                "queue item {} changed since it was read",
                item.id
            ))),
        }
    }
}

impl QueueStorage for PostgresStorage {
    fn save(&self, item: &QueueItem) -> QueueResult<()> {
        self.block_on(self.write_item(item, None))
    }

    fn save_conditional(&self, item: &QueueItem, precondition: WritePrecondition) -> QueueResult<()> {
        self.block_on(self.write_item(item, Some(precondition)))
    }

    fn find(&self, id: QueueItemId) -> QueueResult<Option<QueueItem>> {
        let sql = format!("{QUEUE_SELECT} WHERE id = $1");
        self.block_on(async {
            let row = sqlx::query(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("find queue_item", e))?;
            row.as_ref().map(item_from_row).transpose()
        })
    }

    fn select(&self, filter: &QueryFilter) -> QueueResult<Vec<QueueItem>> {
        let (clause, values) = render_filter(filter, QUEUE_COLUMNS)?;
        self.block_on(self.fetch_items(format!("{QUEUE_SELECT}{clause}"), values))
    }

    fn delete(&self, id: QueueItemId) -> QueueResult<bool> {
        self.block_on(async {
            let result = sqlx::query("DELETE FROM queue_items WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete queue_item", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn find_oldest_queued(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<QueueItem>> {
        let sql = format!(
            "SELECT * FROM ( \
                SELECT DISTINCT ON (q.queue_name) q.* FROM ({QUEUE_SELECT}) q \
                WHERE q.status = 'queued' \
                AND NOT EXISTS ( \
                    SELECT 1 FROM queue_items r \
                    WHERE r.queue_name = q.queue_name AND r.status = 'in_progress' \
                ) \
                ORDER BY q.queue_name, q.queue_timestamp ASC, q.create_timestamp ASC \
             ) oldest \
             WHERE earliest_start_timestamp IS NULL OR earliest_start_timestamp <= $1 \
             ORDER BY queue_timestamp ASC LIMIT {}",
            i64::try_from(limit).unwrap_or(i64::MAX)
        );
        self.block_on(self.fetch_items(sql, vec![FilterValue::Timestamp(now)]))
    }
}

impl ScheduleStorage for PostgresStorage {
    fn save(&self, schedule: &Schedule) -> QueueResult<()> {
        self.block_on(async {
            write_schedule(&self.pool, schedule, true).await.map(|_| ())
        })
    }

    fn update(&self, schedule: &Schedule) -> QueueResult<()> {
        self.block_on(async {
            if write_schedule(&self.pool, schedule, false).await? == 0 {
                return Err(QueueError::not_found(schedule.id.to_string()));
            }
            Ok(())
        })
    }

    fn delete(&self, id: ScheduleId) -> QueueResult<bool> {
        self.block_on(async {
            let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete schedule", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn find(&self, id: ScheduleId) -> QueueResult<Option<Schedule>> {
        let sql = format!("{SCHEDULE_SELECT} WHERE id = $1");
        self.block_on(async {
            let row = sqlx::query(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("find schedule", e))?;
            row.as_ref().map(schedule_from_row).transpose()
        })
    }

    fn select(&self, filter: &QueryFilter) -> QueueResult<Vec<Schedule>> {
        let (clause, values) = render_filter(filter, SCHEDULE_COLUMNS)?;
        let sql = format!("{SCHEDULE_SELECT}{clause}");
        self.block_on(async {
            let rows = bind_values(sqlx::query(&sql), values)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("select schedules", e))?;
            rows.iter().map(schedule_from_row).collect()
        })
    }
}

impl ProcessStorage for PostgresStorage {
    fn save(&self, process: &Process) -> QueueResult<()> {
        let runnable = serde_json::to_value(&process.runnable)?;
        self.block_on(async {
            sqlx::query(
                "INSERT INTO processes (id, runnable, created_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (id) DO UPDATE SET runnable = EXCLUDED.runnable",
            )
            .bind(process.id.as_uuid())
            .bind(runnable)
            .bind(process.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("save process", e))?;
            Ok(())
        })
    }

    fn find(&self, id: ProcessId) -> QueueResult<Option<Process>> {
        self.block_on(async {
            let row = sqlx::query("SELECT id, runnable, created_at FROM processes WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("find process", e))?;
            row.as_ref().map(process_from_row).transpose()
        })
    }

    fn delete(&self, id: ProcessId) -> QueueResult<bool> {
        self.block_on(async {
            let result = sqlx::query("DELETE FROM processes WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete process", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn list(&self) -> QueueResult<Vec<Process>> {
        self.block_on(async {
            let rows = sqlx::query("SELECT id, runnable, created_at FROM processes ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("list processes", e))?;
            rows.iter().map(process_from_row).collect()
        })
    }
}

impl RunnerStatusStorage for PostgresStorage {
    fn get(&self) -> QueueResult<RunnerStatus> {
        self.block_on(async {
            let row = sqlx::query("SELECT guid, alive_since FROM runner_status WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("get runner_status", e))?;
            let Some(row) = row else {
                return Ok(RunnerStatus::empty());
            };
            let guid: Option<Uuid> = row.try_get("guid").map_err(|e| map_sqlx_error("get runner_status", e))?;
            let alive_since: Option<DateTime<Utc>> = row
                .try_get("alive_since")
                .map_err(|e| map_sqlx_error("get runner_status", e))?;
            Ok(RunnerStatus {
                guid: guid.map(RunnerGuid::from_uuid),
                alive_since,
            })
        })
    }

    fn set_status(&self, status: RunnerStatus, expected: Option<RunnerGuid>) -> QueueResult<()> {
        self.block_on(async {
            let result = sqlx::query(
                "UPDATE runner_status SET guid = $1, alive_since = $2 \
                 WHERE id = 1 AND guid IS NOT DISTINCT FROM $3",
            )
            .bind(status.guid.map(Uuid::from))
            .bind(status.alive_since)
            .bind(expected.map(Uuid::from))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set runner_status", e))?;

            if result.rows_affected() == 0 {
                return Err(QueueError::lease_conflict(format!(
                    "runner lease no longer held by {expected:?}"
                )));
            }
            Ok(())
        })
    }
}

async fn write_schedule(pool: &PgPool, schedule: &Schedule, upsert: bool) -> QueueResult<u64> {
    let payload = serde_json::to_value(&schedule.task.payload)?;
    let recurrence = serde_json::to_value(&schedule.recurrence)?;
    let sql = if upsert {
        "INSERT INTO schedules (id, queue_name, context, task_type, payload, recurrence, \
            next_schedule_timestamp, recurring, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (id) DO UPDATE SET queue_name = EXCLUDED.queue_name, context = EXCLUDED.context, \
            task_type = EXCLUDED.task_type, payload = EXCLUDED.payload, recurrence = EXCLUDED.recurrence, \
            next_schedule_timestamp = EXCLUDED.next_schedule_timestamp, recurring = EXCLUDED.recurring"
    } else {
        "UPDATE schedules SET queue_name = $2, context = $3, task_type = $4, payload = $5, \
            recurrence = $6, next_schedule_timestamp = $7, recurring = $8, \
            created_at = $9 \
         WHERE id = $1"
    };

    let result = sqlx::query(sql)
        .bind(schedule.id.as_uuid())
        .bind(&schedule.queue_name)
        .bind(&schedule.context)
        .bind(&schedule.task.task_type)
        .bind(payload)
        .bind(recurrence)
        .bind(schedule.next_schedule_timestamp)
        .bind(schedule.recurring)
        .bind(schedule.created_at)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("save schedule", e))?;
    Ok(result.rows_affected())
}

/// Render a filter as ` WHERE … ORDER BY … LIMIT … OFFSET …` with `$n`
/// placeholders, returning the values to bind in order.
fn render_filter(filter: &QueryFilter, columns: &[&str]) -> QueueResult<(String, Vec<FilterValue>)> {
    let column = |name: &str| -> QueueResult<String> {
        if columns.contains(&name) {
            Ok(name.to_string())
        } else {
            Err(QueueError::validation(format!("unknown filter field: {name}")))
        }
    };

    let mut values = Vec::new();
    let mut groups = Vec::new();
    for group in filter.groups() {
        let mut parts = Vec::with_capacity(group.len());
        for condition in group {
            parts.push(render_condition(condition, &column(&condition.field)?, &mut values));
        }
        groups.push(format!("({})", parts.join(" AND ")));
    }

    let mut sql = String::new();
    if !groups.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&groups.join(" OR "));
    }
    if let Some((field, direction)) = &filter.order_by {
        let direction = match direction {
            Direction::Asc => "ASC NULLS FIRST",
            Direction::Desc => "DESC NULLS LAST",
        };
        sql.push_str(&format!(" ORDER BY {} {direction}", column(field)?));
    }
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if filter.offset > 0 {
        sql.push_str(&format!(" OFFSET {}", filter.offset));
    }
    Ok((sql, values))
}

fn render_condition(condition: &Condition, column: &str, values: &mut Vec<FilterValue>) -> String {
    let mut placeholder = |value: &FilterValue| {
        values.push(value.clone());
        let cast = match value {
            FilterValue::Timestamp(_) => "::timestamptz",
            FilterValue::Integer(_) => "::bigint",
            _ => "::text",
        };
        format!("${}{cast}", values.len())
    };
    // `id` is stored as UUID but filtered as text.
    let column = if column == "id" { "id::text".to_string() } else { column.to_string() };

    match (&condition.operator, &condition.value) {
        (Operator::IsNull, _) => format!("{column} IS NULL"),
        (Operator::IsNotNull, _) => format!("{column} IS NOT NULL"),
        (_, FilterValue::Null) => "FALSE".to_string(),
        (Operator::In, FilterValue::List(list)) if list.is_empty() => "FALSE".to_string(),
        (Operator::NotIn, FilterValue::List(list)) if list.is_empty() => format!("{column} IS NOT NULL"),
        (Operator::In | Operator::NotIn, FilterValue::List(list)) => {
            let placeholders: Vec<String> = list.iter().map(&mut placeholder).collect();
            format!("{column} {} ({})", condition.operator.as_sql(), placeholders.join(", "))
        }
        (op, value) => format!("{column} {} {}", op.as_sql(), placeholder(value)),
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: Vec<FilterValue>,
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            FilterValue::Null => query.bind(Option::<String>::None),
            FilterValue::Text(text) => query.bind(text),
            FilterValue::Integer(int) => query.bind(int),
            FilterValue::Timestamp(at) => query.bind(at),
            // Lists are flattened by `render_condition`.
            FilterValue::List(_) => query.bind(Option::<String>::None),
        };
    }
    query
}

fn item_from_row(row: &PgRow) -> QueueResult<QueueItem> {
    let read = |e| map_sqlx_error("read queue_item", e);
    let status: String = row.try_get("status").map_err(read)?;
    let id: Uuid = row.try_get("id").map_err(read)?;
    Ok(QueueItem {
        id: QueueItemId::from_uuid(id),
        status: status.parse()?,
        context: row.try_get("context").map_err(read)?,
        queue_name: row.try_get("queue_name").map_err(read)?,
        task: TaskPayload::new(
            row.try_get::<String, _>("task_type").map_err(read)?,
            row.try_get("payload").map_err(read)?,
        ),
        progress_base_points: to_u32(row.try_get("progress_base_points").map_err(read)?)?,
        last_execution_progress_base_points: to_u32(
            row.try_get("last_execution_progress_base_points").map_err(read)?,
        )?,
        retries: to_u32(row.try_get("retries").map_err(read)?)?,
        failure_description: row.try_get("failure_description").map_err(read)?,
        create_timestamp: row.try_get("create_timestamp").map_err(read)?,
        queue_timestamp: row.try_get("queue_timestamp").map_err(read)?,
        start_timestamp: row.try_get("start_timestamp").map_err(read)?,
        finish_timestamp: row.try_get("finish_timestamp").map_err(read)?,
        fail_timestamp: row.try_get("fail_timestamp").map_err(read)?,
        earliest_start_timestamp: row.try_get("earliest_start_timestamp").map_err(read)?,
        last_update_timestamp: row.try_get("last_update_timestamp").map_err(read)?,
    })
}

fn schedule_from_row(row: &PgRow) -> QueueResult<Schedule> {
    let read = |e| map_sqlx_error("read schedule", e);
    let id: Uuid = row.try_get("id").map_err(read)?;
    let recurrence: serde_json::Value = row.try_get("recurrence").map_err(read)?;
    Ok(Schedule {
        id: ScheduleId::from_uuid(id),
        recurrence: serde_json::from_value(recurrence)?,
        task: TaskPayload::new(
            row.try_get::<String, _>("task_type").map_err(read)?,
            row.try_get("payload").map_err(read)?,
        ),
        queue_name: row.try_get("queue_name").map_err(read)?,
        context: row.try_get("context").map_err(read)?,
        next_schedule_timestamp: row.try_get("next_schedule_timestamp").map_err(read)?,
        recurring: row.try_get("recurring").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}

fn process_from_row(row: &PgRow) -> QueueResult<Process> {
    let read = |e| map_sqlx_error("read process", e);
    let id: Uuid = row.try_get("id").map_err(read)?;
    let runnable: serde_json::Value = row.try_get("runnable").map_err(read)?;
    Ok(Process {
        id: ProcessId::from_uuid(id),
        runnable: serde_json::from_value(runnable)?,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}

fn to_u32(value: i64) -> QueueResult<u32> {
    u32::try_from(value).map_err(|_| QueueError::deserialization(format!("counter out of range: {value}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::Database(db_err) => {
            QueueError::storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => QueueError::storage(format!("connection pool closed in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            QueueError::deserialization(format!("undecodable row in {operation}: {err}"))
        }
        _ => QueueError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_or_groups_and_lists() {
        let filter = QueryFilter::new()
            .and("status", Operator::In, vec!["queued", "in_progress"])
            .and("queue_name", Operator::Equals, "q1")
            .or("retries", Operator::GreaterThan, 3_i64)
            .with_order("queue_timestamp", Direction::Asc)
            .with_limit(5);

        let (sql, values) = render_filter(&filter, QUEUE_COLUMNS).unwrap();
        assert_eq!(
            sql,
            " WHERE (status IN ($1::text, $2::text) AND queue_name = $3::text) OR (retries > $4::bigint) \
             ORDER BY queue_timestamp ASC NULLS FIRST LIMIT 5"
        );
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn rejects_columns_outside_the_table() {
        let filter = QueryFilter::new().and("payload", Operator::Equals, "{}");
        assert!(matches!(render_filter(&filter, QUEUE_COLUMNS), Err(QueueError::Validation(_))));
    }

    #[test]
    fn null_comparisons_never_match() {
        let filter = QueryFilter::new()
            .and("failure_description", Operator::Equals, FilterValue::Null)
            .or("fail_timestamp", Operator::IsNull, FilterValue::Null);
        let (sql, values) = render_filter(&filter, QUEUE_COLUMNS).unwrap();
        assert_eq!(sql, " WHERE (FALSE) OR (fail_timestamp IS NULL)");
        assert!(values.is_empty());
    }
}
