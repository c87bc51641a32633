//! In-process [`Store`] with failure injection, for tests and dry runs.

use crate::store::{AnalysisRow, FeedbackRow, ReadingRow, Store, StoreError, WindowAverage};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryInner {
    readings: Vec<ReadingRow>,
    feedback: Vec<FeedbackRow>,
    analyses: Vec<AnalysisRow>,
    connection_failures: u32,
    query_failures: u32,
    fail_reconnects: bool,
    insert_attempts: u32,
    average_queries: u32,
    reconnects: u32,
}

/// Cloning shares the underlying tables, so a test can keep a handle after
/// boxing the store into the service.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next `count` operations fail with a connection error.
    pub fn fail_next_connections(&self, count: u32) {
        self.lock().connection_failures = count;
    }

    /// The next `count` operations fail with a query error.
    pub fn fail_next_queries(&self, count: u32) {
        self.lock().query_failures = count;
    }

    pub fn fail_reconnects(&self, fail: bool) {
        self.lock().fail_reconnects = fail;
    }

    pub fn readings(&self) -> Vec<ReadingRow> {
        self.lock().readings.clone()
    }

    pub fn feedback(&self) -> Vec<FeedbackRow> {
        self.lock().feedback.clone()
    }

    pub fn analyses(&self) -> Vec<AnalysisRow> {
        self.lock().analyses.clone()
    }

    pub fn insert_attempts(&self) -> u32 {
        self.lock().insert_attempts
    }

    pub fn average_queries(&self) -> u32 {
        self.lock().average_queries
    }

    pub fn reconnects(&self) -> u32 {
        self.lock().reconnects
    }

    fn check_failure(inner: &mut MemoryInner) -> Result<(), StoreError> {
        if inner.connection_failures > 0 {
            inner.connection_failures -= 1;
            return Err(StoreError::Connection("connection reset by peer".to_string()));
        }
        if inner.query_failures > 0 {
            inner.query_failures -= 1;
            return Err(StoreError::Query("constraint violation".to_string()));
        }
        Ok(())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / f64::from(count))
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_reading(&mut self, row: &ReadingRow) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.insert_attempts += 1;
        Self::check_failure(&mut inner)?;
        inner.readings.push(row.clone());
        Ok(())
    }

    async fn insert_feedback(&mut self, row: &FeedbackRow) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.insert_attempts += 1;
        Self::check_failure(&mut inner)?;
        inner.feedback.push(row.clone());
        Ok(())
    }

    async fn insert_analysis(&mut self, row: &AnalysisRow) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.insert_attempts += 1;
        Self::check_failure(&mut inner)?;
        inner.analyses.push(row.clone());
        Ok(())
    }

    async fn average_since(&mut self, since: NaiveDateTime) -> Result<WindowAverage, StoreError> {
        let mut inner = self.lock();
        inner.average_queries += 1;
        Self::check_failure(&mut inner)?;
        let matching: Vec<&ReadingRow> = inner
            .readings
            .iter()
            .filter(|row| row.timestamp > since)
            .collect();
        Ok(WindowAverage {
            timestamp: since.to_string(),
            co2: mean(matching.iter().map(|row| row.co2)),
            temperature: mean(matching.iter().map(|row| row.temperature)),
            humidity: mean(matching.iter().map(|row| row.humidity)),
        })
    }

    async fn reconnect(&mut self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.reconnects += 1;
        if inner.fail_reconnects {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}
