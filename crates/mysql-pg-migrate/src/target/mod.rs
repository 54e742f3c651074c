//! PostgreSQL target database operations.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use futures::SinkExt;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Config as PgConfig, NoTls, SimpleQueryMessage};
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::{Catalog, ColumnDescriptor, Database, Row, SqlValue};
use crate::error::{MigrateError, Result};

/// Load and integrity operations on the target database.
#[async_trait]
pub trait TargetPool: Catalog {
    /// Bulk-insert rows into the named columns. Columns not listed take their default.
    async fn write_batch(&self, table: &str, columns: &[String], rows: Vec<Row>) -> Result<u64>;

    /// Tables in the target schema that declare at least one foreign key.
    async fn tables_with_foreign_keys(&self) -> Result<Vec<String>>;

    /// Stop enforcing triggers (and with them foreign keys) on a table.
    async fn disable_triggers(&self, table: &str) -> Result<()>;

    /// Resume enforcing triggers on a table.
    async fn enable_triggers(&self, table: &str) -> Result<()>;

    /// Remove all rows and reset owned sequences.
    async fn truncate_table(&self, table: &str) -> Result<()>;
}

/// Rows buffered before each COPY send.
const COPY_FLUSH_ROWS: usize = 10_000;

/// PostgreSQL target pool implementation.
pub struct PgPool {
    pool: Pool,
    schema: String,
}

impl PgPool {
    /// Create a new PostgreSQL target pool. Connections are opened on demand.
    pub fn new(
        config: &TargetConfig,
        max_conns: usize,
        timeout: Duration,
        query_timeout: Duration,
    ) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name(&config.application_name);
        pg_config.connect_timeout(timeout);
        pg_config.options(&statement_timeout_option(query_timeout));
        pg_config.ssl_mode(match config.ssl_mode.to_lowercase().as_str() {
            "disable" => SslMode::Disable,
            "require" => SslMode::Require,
            _ => SslMode::Prefer,
        });

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        debug!(
            "Created PostgreSQL target pool for {}:{}/{} (schema {})",
            config.host, config.port, config.database, config.schema
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }

    fn qualify(&self, table: &str) -> Result<String> {
        qualify_pg(&self.schema, table)
    }

    async fn execute_ddl(&self, sql: &str, context: &str) -> Result<()> {
        let client = self.client(context).await?;
        client.batch_execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for PgPool {
    fn database(&self) -> Database {
        Database::Target
    }

    async fn test_connection(&self) -> Result<()> {
        let client = self.client("testing PostgreSQL target connection").await?;
        client.simple_query("SELECT 1").await?;
        info!("Connected to PostgreSQL target (schema {})", self.schema);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client("listing PostgreSQL tables").await?;
        let rows = client
            .query(
                "SELECT table_name::text
                 FROM information_schema.tables
                 WHERE table_schema::text = $1 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&self.schema],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let client = self.client("describing PostgreSQL table").await?;
        let rows = client
            .query(
                "SELECT column_name::text,
                        data_type::text,
                        is_nullable::text = 'YES',
                        is_generated::text = 'ALWAYS'
                 FROM information_schema.columns
                 WHERE table_schema::text = $1 AND table_name::text = $2
                 ORDER BY ordinal_position",
                &[&self.schema, &table],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| ColumnDescriptor {
                name: r.get(0),
                data_type: r.get(1),
                is_nullable: r.get(2),
                is_generated: r.get(3),
            })
            .collect())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client("counting PostgreSQL rows").await?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualify(table)?);
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn foreign_key_count(&self, table: &str) -> Result<i64> {
        let client = self.client("counting PostgreSQL foreign keys").await?;
        let row = client
            .query_one(
                "SELECT COUNT(*)
                 FROM pg_constraint con
                 JOIN pg_class c ON c.oid = con.conrelid
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE con.contype = 'f' AND n.nspname::text = $1 AND c.relname::text = $2",
                &[&self.schema, &table],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>> {
        // Simple protocol returns every value as text, whatever the column type
        let client = self.client("sampling PostgreSQL rows").await?;
        let sql = format!(
            "SELECT * FROM {} ORDER BY RANDOM() LIMIT {}",
            self.qualify(table)?,
            limit
        );
        let messages = client.simple_query(&sql).await?;

        Ok(messages
            .iter()
            .filter_map(|msg| match msg {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| row.get(i).map(SqlValue::from).unwrap_or(SqlValue::Null))
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl TargetPool for PgPool {
    async fn write_batch(&self, table: &str, columns: &[String], rows: Vec<Row>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let qualified = self.qualify(table)?;
        let col_list = columns
            .iter()
            .map(|c| quote_pg(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let copy_stmt = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            qualified, col_list
        );

        let client = self.client("writing PostgreSQL batch").await?;
        let sink = client.copy_in(&copy_stmt).await?;
        futures::pin_mut!(sink);

        let mut buf = BytesMut::with_capacity(1024 * 1024);
        let row_count = rows.len();

        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    buf.put_u8(b'\t');
                }
                buf.extend_from_slice(sql_value_to_copy_text(value).as_bytes());
            }
            buf.put_u8(b'\n');

            if (i + 1) % COPY_FLUSH_ROWS == 0 || i + 1 == row_count {
                sink.send(buf.split().freeze())
                    .await
                    .map_err(|e| MigrateError::transfer(&qualified, format!("COPY send failed: {}", e)))?;
            }
        }

        let copied = sink.finish().await?;
        debug!("Copied {} rows into {}", copied, qualified);
        Ok(copied)
    }

    async fn tables_with_foreign_keys(&self) -> Result<Vec<String>> {
        let client = self.client("listing PostgreSQL foreign keys").await?;
        let rows = client
            .query(
                "SELECT DISTINCT c.relname::text
                 FROM pg_constraint con
                 JOIN pg_class c ON c.oid = con.conrelid
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE con.contype = 'f' AND n.nspname::text = $1
                 ORDER BY 1",
                &[&self.schema],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn disable_triggers(&self, table: &str) -> Result<()> {
        let sql = format!("ALTER TABLE {} DISABLE TRIGGER ALL", self.qualify(table)?);
        self.execute_ddl(&sql, "disabling PostgreSQL triggers").await?;
        debug!("Disabled triggers on {}", table);
        Ok(())
    }

    async fn enable_triggers(&self, table: &str) -> Result<()> {
        let sql = format!("ALTER TABLE {} ENABLE TRIGGER ALL", self.qualify(table)?);
        self.execute_ddl(&sql, "enabling PostgreSQL triggers").await?;
        debug!("Enabled triggers on {}", table);
        Ok(())
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        let sql = format!(
            "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
            self.qualify(table)?
        );
        self.execute_ddl(&sql, "truncating PostgreSQL table").await?;
        debug!("Truncated table {}.{}", self.schema, table);
        Ok(())
    }
}

/// Server option capping every statement on the session. Zero disables the cap.
fn statement_timeout_option(query_timeout: Duration) -> String {
    format!("-c statement_timeout={}", query_timeout.as_millis())
}

/// Render a value in COPY text format.
fn sql_value_to_copy_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::U64(n) => n.to_string(),
        SqlValue::F64(n) => n.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::String(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Date(d) => d.to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.6f").to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        SqlValue::DateTimeUtc(dt) => dt.to_rfc3339(),
    }
}

/// Escape backslash, tab, newline and carriage return for COPY text format.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_statement_timeout_option() {
        assert_eq!(
            statement_timeout_option(Duration::from_secs(300)),
            "-c statement_timeout=300000"
        );
        assert_eq!(
            statement_timeout_option(Duration::ZERO),
            "-c statement_timeout=0"
        );
    }

    #[test]
    fn test_copy_text_escaping() {
        assert_eq!(escape_copy_text("a\tb\nc\\d\r"), "a\\tb\\nc\\\\d\\r");
        assert_eq!(escape_copy_text("plain"), "plain");
    }

    #[test]
    fn test_copy_text_values() {
        assert_eq!(sql_value_to_copy_text(&SqlValue::Null), "\\N");
        assert_eq!(sql_value_to_copy_text(&SqlValue::Bool(true)), "t");
        assert_eq!(sql_value_to_copy_text(&SqlValue::U64(u64::MAX)), "18446744073709551615");
        assert_eq!(sql_value_to_copy_text(&SqlValue::Bytes(vec![0xde, 0xad])), "\\\\xdead");
        assert_eq!(
            sql_value_to_copy_text(&SqlValue::from("{\"a\",\"b\\\\c\"}")),
            "{\"a\",\"b\\\\\\\\c\"}"
        );

        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap();
        assert_eq!(
            sql_value_to_copy_text(&SqlValue::DateTime(dt)),
            "2024-01-02 03:04:05.000000"
        );
    }
}
