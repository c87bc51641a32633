//! PostgreSQL store over a single `sqlx` connection.

use crate::store::{AnalysisRow, FeedbackRow, ReadingRow, Store, StoreError, WindowAverage};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Connection, PgConnection};
use tracing::{info, warn};

const CREATE_READINGS: &str = "CREATE TABLE IF NOT EXISTS classroom_environmental_data (
    id SERIAL PRIMARY KEY,
    timestamp TIMESTAMP NOT NULL,
    co2_values DOUBLE PRECISION NOT NULL,
    temperature DOUBLE PRECISION NOT NULL,
    humidity DOUBLE PRECISION NOT NULL,
    classroom_number TEXT NOT NULL
)";

const CREATE_FEEDBACK: &str = "CREATE TABLE IF NOT EXISTS feedback_tabelle (
    id SERIAL PRIMARY KEY,
    temperature DOUBLE PRECISION NOT NULL,
    humidity DOUBLE PRECISION NOT NULL,
    co2 DOUBLE PRECISION NOT NULL,
    timestamp TIMESTAMP NOT NULL,
    outdoor_temperature DOUBLE PRECISION NOT NULL,
    accurate_prediction BOOLEAN NOT NULL
)";

const CREATE_ANALYSIS: &str = "CREATE TABLE IF NOT EXISTS environmental_data_analysis (
    id SERIAL PRIMARY KEY,
    timestamp TIMESTAMP NOT NULL,
    current_co2 DOUBLE PRECISION,
    future_co2 DOUBLE PRECISION,
    co2_change DOUBLE PRECISION,
    current_temperature DOUBLE PRECISION,
    future_temperature DOUBLE PRECISION,
    temperature_change DOUBLE PRECISION,
    current_humidity DOUBLE PRECISION,
    future_humidity DOUBLE PRECISION,
    humidity_change DOUBLE PRECISION,
    decision SMALLINT NOT NULL
)";

/// Maps transport-level failures to [`StoreError::Connection`]; everything
/// else is a query error and is not retried.
fn map_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
        _ => StoreError::Query(err.to_string()),
    }
}

pub struct PgStore {
    url: String,
    conn: Option<PgConnection>,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("connected", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl PgStore {
    pub async fn connect(url: impl Into<String>) -> Result<Self, StoreError> {
        let url = url.into();
        let conn = PgConnection::connect(&url).await.map_err(map_error)?;
        info!("Connected to PostgreSQL");
        Ok(Self {
            url,
            conn: Some(conn),
        })
    }

    /// A store that connects on its first reconnect.
    pub fn disconnected(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn connection(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Connection("not connected".to_string()))
    }

    pub async fn ensure_schema(&mut self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        for statement in [CREATE_READINGS, CREATE_FEEDBACK, CREATE_ANALYSIS] {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(map_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_reading(&mut self, row: &ReadingRow) -> Result<(), StoreError> {
        let mut tx = self.connection()?.begin().await.map_err(map_error)?;
        sqlx::query(
            "INSERT INTO classroom_environmental_data
                (timestamp, co2_values, temperature, humidity, classroom_number)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(row.timestamp)
        .bind(row.co2)
        .bind(row.temperature)
        .bind(row.humidity)
        .bind(&row.location)
        .execute(&mut *tx)
        .await
        .map_err(map_error)?;
        tx.commit().await.map_err(map_error)
    }

    async fn insert_feedback(&mut self, row: &FeedbackRow) -> Result<(), StoreError> {
        let mut tx = self.connection()?.begin().await.map_err(map_error)?;
        sqlx::query(
            "INSERT INTO feedback_tabelle
                (temperature, humidity, co2, timestamp, outdoor_temperature, accurate_prediction)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(row.temperature)
        .bind(row.humidity)
        .bind(row.co2)
        .bind(row.timestamp)
        .bind(row.outdoor_temperature)
        .bind(row.accurate_prediction)
        .execute(&mut *tx)
        .await
        .map_err(map_error)?;
        tx.commit().await.map_err(map_error)
    }

    async fn insert_analysis(&mut self, row: &AnalysisRow) -> Result<(), StoreError> {
        let mut tx = self.connection()?.begin().await.map_err(map_error)?;
        sqlx::query(
            "INSERT INTO environmental_data_analysis (
                timestamp, current_co2, future_co2, co2_change,
                current_temperature, future_temperature, temperature_change,
                current_humidity, future_humidity, humidity_change, decision
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(row.timestamp)
        .bind(row.current.co2)
        .bind(row.future.co2)
        .bind(row.co2_change)
        .bind(row.current.temperature)
        .bind(row.future.temperature)
        .bind(row.temperature_change)
        .bind(row.current.humidity)
        .bind(row.future.humidity)
        .bind(row.humidity_change)
        .bind(i16::from(row.decision))
        .execute(&mut *tx)
        .await
        .map_err(map_error)?;
        tx.commit().await.map_err(map_error)
    }

    async fn average_since(&mut self, since: NaiveDateTime) -> Result<WindowAverage, StoreError> {
        let conn = self.connection()?;
        let (co2, temperature, humidity): (Option<f64>, Option<f64>, Option<f64>) = sqlx::query_as(
            "SELECT AVG(co2_values), AVG(temperature), AVG(humidity)
             FROM classroom_environmental_data
             WHERE timestamp > $1",
        )
        .bind(since)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_error)?;
        Ok(WindowAverage {
            timestamp: since.to_string(),
            co2,
            temperature,
            humidity,
        })
    }

    async fn reconnect(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take()
            && let Err(err) = conn.close().await
        {
            warn!(error = %err, "Closing the broken connection failed");
        }
        let conn = PgConnection::connect(&self.url).await.map_err(map_error)?;
        self.conn = Some(conn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_connection_class() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(map_error(io).is_connection());
        assert!(map_error(sqlx::Error::PoolTimedOut).is_connection());
        assert!(map_error(sqlx::Error::Protocol("unexpected message".into())).is_connection());
    }

    #[test]
    fn statement_errors_are_query_class() {
        assert!(!map_error(sqlx::Error::RowNotFound).is_connection());
        assert!(!map_error(sqlx::Error::ColumnNotFound("co2".into())).is_connection());
    }

    #[tokio::test]
    async fn disconnected_store_reports_connection_error() {
        let mut store = PgStore::disconnected("postgres://localhost/unused");

        let result = store.average_since(NaiveDateTime::default()).await;

        assert!(!store.is_connected());
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }
}
