//! MySQL/MariaDB source database operations.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column as _, Executor as _, Row as _, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::identifier::quote_mysql;
use crate::core::{Catalog, ColumnDescriptor, Database, Row, SqlValue};
use crate::error::{MigrateError, Result};

/// Extraction operations on the source database.
#[async_trait]
pub trait SourcePool: Catalog {
    /// Read one page of a table.
    ///
    /// No ORDER BY is issued: page boundaries follow the engine's natural
    /// row order, which is stable only while the table is not being written.
    async fn read_batch(
        &self,
        table: &str,
        columns: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>>;
}

/// MySQL source pool implementation.
pub struct MysqlPool {
    pool: MySqlPool,
    database: String,
}

impl MysqlPool {
    /// Create a lazily connecting pool. No connection is opened until first use.
    pub fn new(
        config: &SourceConfig,
        max_conns: u32,
        acquire_timeout: Duration,
        query_timeout: Duration,
    ) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .charset(&config.charset)
            .ssl_mode(MySqlSslMode::Preferred);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns.max(1))
            .acquire_timeout(acquire_timeout)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    // MariaDB rejects max_execution_time and names the cap in seconds
                    let [mysql, mariadb] = execution_time_statements(query_timeout);
                    if let Err(e) = (&mut *conn).execute(mysql.as_str()).await {
                        debug!("max_execution_time unsupported ({}), trying max_statement_time", e);
                        if let Err(e) = (&mut *conn).execute(mariadb.as_str()).await {
                            debug!("Session statement timeout not applied: {}", e);
                        }
                    }
                    Ok(())
                })
            })
            .connect_lazy_with(options);

        debug!(
            "Created MySQL source pool for {}:{}/{} (max {} connections)",
            config.host, config.port, config.database, max_conns
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }

    /// Convert a row to values using the column types reported by the server.
    fn decode_row(row: &MySqlRow) -> Result<Row> {
        (0..row.columns().len())
            .map(|idx| Self::decode_value(row, idx))
            .collect()
    }

    fn decode_value(row: &MySqlRow, idx: usize) -> Result<SqlValue> {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(SqlValue::Null);
        }

        let type_name = row.column(idx).type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "BOOLEAN" => SqlValue::Bool(row.try_get::<bool, _>(idx)?),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                SqlValue::I64(row.try_get::<i64, _>(idx)?)
            }
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" | "BIT" | "YEAR" => SqlValue::U64(row.try_get::<u64, _>(idx)?),
            "FLOAT" | "DOUBLE" => SqlValue::F64(row.try_get::<f64, _>(idx)?),
            "DECIMAL" => SqlValue::Decimal(row.try_get::<rust_decimal::Decimal, _>(idx)?),
            "DATE" => temporal_or_null(row.try_get::<chrono::NaiveDate, _>(idx), SqlValue::Date),
            "TIME" => temporal_or_null(row.try_get::<chrono::NaiveTime, _>(idx), SqlValue::Time),
            "DATETIME" | "TIMESTAMP" => temporal_or_null(
                row.try_get::<chrono::NaiveDateTime, _>(idx),
                SqlValue::DateTime,
            ),
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB"
            | "GEOMETRY" => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
            "JSON" => SqlValue::String(row.try_get::<serde_json::Value, _>(idx)?.to_string()),
            _ => match row.try_get::<String, _>(idx) {
                Ok(s) => SqlValue::String(s),
                Err(_) => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
            },
        };
        Ok(value)
    }
}

/// `SET SESSION` statements capping statement run time, MySQL form first.
fn execution_time_statements(query_timeout: Duration) -> [String; 2] {
    [
        format!(
            "SET SESSION max_execution_time = {}",
            query_timeout.as_millis()
        ),
        format!(
            "SET SESSION max_statement_time = {}",
            query_timeout.as_secs_f64()
        ),
    ]
}

/// Zero dates and out-of-range TIME values have no chrono form and load as NULL.
fn temporal_or_null<T>(
    decoded: std::result::Result<T, sqlx::Error>,
    wrap: fn(T) -> SqlValue,
) -> SqlValue {
    match decoded {
        Ok(value) => wrap(value),
        Err(e) => {
            debug!("Temporal value not representable, loading NULL: {}", e);
            SqlValue::Null
        }
    }
}

#[async_trait]
impl Catalog for MysqlPool {
    fn database(&self) -> Database {
        Database::Source
    }

    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL source connection"))?;
        info!("Connected to MySQL source: {}", self.database);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<MySqlRow> = sqlx::query(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<String> { Ok(row.try_get("TABLE_NAME")?) })
            .collect()
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        // CAST to CHAR to sidestep collation-dependent binary strings
        let rows: Vec<MySqlRow> = sqlx::query(
            r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE,
                CAST(IF(IS_NULLABLE = 'YES', 1, 0) AS SIGNED) AS is_nullable,
                CAST(IF(EXTRA LIKE '%VIRTUAL GENERATED%' OR EXTRA LIKE '%STORED GENERATED%', 1, 0)
                    AS SIGNED) AS is_generated
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ColumnDescriptor> {
                Ok(ColumnDescriptor {
                    name: row.try_get("COLUMN_NAME")?,
                    data_type: row.try_get("DATA_TYPE")?,
                    is_nullable: row.try_get::<i64, _>("is_nullable")? == 1,
                    is_generated: row.try_get::<i64, _>("is_generated")? == 1,
                })
            })
            .collect()
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_mysql(table)?);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn foreign_key_count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT CAST(COUNT(*) AS SIGNED)
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_TYPE = 'FOREIGN KEY'
            "#,
        )
        .bind(&self.database)
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>> {
        let sql = format!("SELECT * FROM {} ORDER BY RAND() LIMIT ?", quote_mysql(table)?);
        let rows: Vec<MySqlRow> = sqlx::query(&sql)
            .bind(limit as u64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SourcePool for MysqlPool {
    async fn read_batch(
        &self,
        table: &str,
        columns: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>> {
        let col_list = columns
            .iter()
            .map(|c| quote_mysql(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} LIMIT ? OFFSET ?",
            col_list,
            quote_mysql(table)?
        );

        let rows: Vec<MySqlRow> = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::transfer(table, format!("reading rows: {}", e)))?;

        debug!(
            "Read {} rows from {} (offset {}, limit {})",
            rows.len(),
            table,
            offset,
            limit
        );
        rows.iter().map(Self::decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_execution_time_statements() {
        let [mysql, mariadb] = execution_time_statements(Duration::from_secs(300));
        assert_eq!(mysql, "SET SESSION max_execution_time = 300000");
        assert_eq!(mariadb, "SET SESSION max_statement_time = 300");
    }

    #[test]
    fn test_zero_date_loads_as_null() {
        let zero_date: std::result::Result<NaiveDate, sqlx::Error> =
            Err(sqlx::Error::Decode("0000-00-00 is not a valid date".into()));
        assert_eq!(temporal_or_null(zero_date, SqlValue::Date), SqlValue::Null);

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(temporal_or_null(Ok(date), SqlValue::Date), SqlValue::Date(date));
    }
}
