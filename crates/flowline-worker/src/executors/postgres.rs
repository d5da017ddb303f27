//! `postgres` executor: runs the step's `sql` against the worker's shared
//! connection pool (`FLOWLINE_TASK_DATABASE_URL`), distinct from the
//! orchestrator's own event/queue store. Query parameters come from
//! `rendered_args.params` (positional `$1, $2, ...`); rows are returned as
//! a JSON array of objects.

use std::sync::Arc;

use async_trait::async_trait;
use flowline_contracts::Step;
use flowline_core::{ExecutionOutcome, Executor};
use serde_json::Value;
use sqlx::{Column, PgPool, Row};

pub struct PostgresExecutor {
    pool: Arc<PgPool>,
}

impl PostgresExecutor {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Executor for PostgresExecutor {
    async fn execute(&self, task: &Step, _context: &Value, rendered_args: Value) -> ExecutionOutcome {
        let Some(sql) = task.sql.as_deref() else {
            return ExecutionOutcome::error("postgres step has no sql");
        };

        let mut query = sqlx::query(sql);
        if let Some(params) = rendered_args.get("params").and_then(Value::as_array) {
            for param in params {
                query = bind_json(query, param);
            }
        }

        match query.fetch_all(self.pool.as_ref()).await {
            Ok(rows) => {
                let out: Vec<Value> = rows.iter().map(row_to_json).collect();
                ExecutionOutcome::success(serde_json::json!({ "rows": out, "row_count": out.len() }))
            }
            Err(e) => ExecutionOutcome::error(e.to_string()),
        }
    }
}

fn bind_json<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        Value::Number(n) => query.bind(n.as_f64()),
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    let mut obj = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name();
        let value: Value = row
            .try_get::<Option<String>, _>(name)
            .map(|v| v.map(Value::String).unwrap_or(Value::Null))
            .or_else(|_| row.try_get::<Option<i64>, _>(name).map(|v| v.map(|n| Value::from(n)).unwrap_or(Value::Null)))
            .or_else(|_| row.try_get::<Option<f64>, _>(name).map(|v| v.map(|n| Value::from(n)).unwrap_or(Value::Null)))
            .or_else(|_| row.try_get::<Option<bool>, _>(name).map(|v| v.map(Value::Bool).unwrap_or(Value::Null)))
            .unwrap_or(Value::Null);
        obj.insert(name.to_string(), value);
    }
    Value::Object(obj)
}
