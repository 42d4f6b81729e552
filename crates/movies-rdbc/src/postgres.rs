//! PostgreSQL backend implementation for movies-rdbc
//!
//! Provides:
//! - Connection over tokio-postgres
//! - Row conversion into [`Value`]s
//! - Error classification (transient vs. permanent) by SQLSTATE

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tracing::{debug, error};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type SqlParam = Box<dyn ToSql + Sync + Send>;

fn value_to_sql(value: &Value) -> SqlParam {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int(n) => Box::new(*n),
        Value::Float(f) => Box::new(*f),
        Value::Decimal(d) => Box::new(*d),
        Value::Text(s) => Box::new(s.clone()),
        Value::Timestamp(ts) => Box::new(*ts),
        Value::Uuid(id) => Box::new(*id),
        Value::Json(doc) => Box::new(doc.clone()),
    }
}

fn pg_row_to_row(row: &tokio_postgres::Row) -> Result<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let value = decode_column(row, idx, col.type_())?;
            Ok::<_, Error>((col.name().to_string(), value))
        })
        .collect()
}

/// Decode one column. SQL NULL becomes [`Value::Null`]; a value the driver
/// cannot decode is a `TypeConversion` error naming the column.
fn decode_column(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value> {
    fn get<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, wrap: F) -> Result<Value>
    where
        T: FromSql<'a>,
        F: FnOnce(T) -> Value,
    {
        match row.try_get::<_, Option<T>>(idx) {
            Ok(value) => Ok(value.map_or(Value::Null, wrap)),
            Err(e) => Err(decode_error(row.columns()[idx].name(), e)),
        }
    }

    match *ty {
        Type::BOOL => get(row, idx, Value::Bool),
        Type::INT2 => get(row, idx, |n: i16| Value::Int(n.into())),
        Type::INT4 => get(row, idx, |n: i32| Value::Int(n.into())),
        Type::INT8 => get(row, idx, Value::Int),
        Type::FLOAT4 => get(row, idx, |f: f32| Value::Float(f.into())),
        Type::FLOAT8 => get(row, idx, Value::Float),
        Type::NUMERIC => get(row, idx, Value::Decimal),
        Type::TIMESTAMP => get(row, idx, |ts: chrono::NaiveDateTime| Value::from(ts)),
        Type::TIMESTAMPTZ => get(row, idx, Value::Timestamp),
        Type::UUID => get(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => get(row, idx, Value::Json),
        _ => get(row, idx, Value::Text),
    }
}

fn decode_error(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::type_conversion(format!("column '{}': {}", column, source)).with_source(source)
}

/// Classify a tokio-postgres error into the movies-rdbc taxonomy.
///
/// Lost connections and server shutdowns are retriable; SQL errors are not.
pub(crate) fn classify_pg_error(err: tokio_postgres::Error, sql: &str) -> Error {
    if err.is_closed() {
        return Error::connection_with_source("connection closed", err);
    }

    let Some(code) = err.code().cloned() else {
        // No SQLSTATE means the failure happened below the protocol (I/O, TLS).
        return Error::connection_with_source("connection failure", err);
    };

    let message = err.to_string();
    let class = &code.code()[..2];

    if class == "08"
        || code == SqlState::ADMIN_SHUTDOWN
        || code == SqlState::CRASH_SHUTDOWN
        || code == SqlState::CANNOT_CONNECT_NOW
    {
        Error::connection_with_source(message, err)
    } else if code == SqlState::T_R_DEADLOCK_DETECTED {
        Error::deadlock()
    } else if code == SqlState::QUERY_CANCELED {
        Error::timeout(message)
    } else if class == "28" {
        Error::authentication(message)
    } else {
        Error::query_with_sql(message, sql).with_source(err)
    }
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }

        let boxed_params: Vec<SqlParam> =
            params.iter().map(value_to_sql).collect();

        let param_refs: Vec<&(dyn ToSql + Sync)> = boxed_params
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let pg_rows = self
            .client
            .query(sql, &param_refs)
            .await
            .map_err(|e| classify_pg_error(e, sql))?;

        pg_rows.iter().map(pg_row_to_row).collect()
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::config(format!("invalid connection url: {}", e)))?;
        pg_config
            .connect_timeout(config.connect_timeout)
            .application_name(&config.application_name);

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        debug!(url = %config.redacted_url(), "Connected to PostgreSQL");
        Ok(Box::new(PgConnection::new(client)))
    }
}
