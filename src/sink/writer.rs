//! # Transaction Writer
//!
//! Fire-and-forget Postgres persistence for scored events. Writers retry
//! with exponential backoff up to a bounded attempt count, then drop the row
//! to the dead-letter counter. A full queue also dead-letters instead of
//! blocking the scoring path.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::metrics::{SINK_DEAD_LETTER_TOTAL, SINK_RETRIES_TOTAL};
use crate::types::{RiskMeshError, RiskMeshResult, TransactionId};

/// One persisted row per processed event
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub user_id: String,
    pub device_id: String,
    pub ip_address: String,
    pub merchant_id: String,
    pub card_id: Option<String>,
    pub transaction_amount: f64,
    pub risk_score: f64,
    pub propagation_depth: i32,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Writer pool configuration
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_connections: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_size: 1024,
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_connections: 10,
        }
    }
}

/// Handle to the durable sink. Cloneable; all clones feed the same queue.
#[derive(Clone)]
pub struct TransactionSink {
    tx: Option<mpsc::Sender<TransactionRecord>>,
    queue_size: usize,
}

impl TransactionSink {
    /// Connect to Postgres, bootstrap the schema, and start the worker pool.
    pub async fn connect(database_url: &str, config: SinkConfig) -> RiskMeshResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RiskMeshError::Sink(e.to_string()))?;

        Self::init_schema(&pool).await?;
        info!("Connected to transaction store");

        let (tx, rx) = mpsc::channel::<TransactionRecord>(config.queue_size);
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..config.workers.max(1) {
            let pool = pool.clone();
            let rx = rx.clone();
            let config = config.clone();
            tokio::spawn(async move {
                loop {
                    let record = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(record) = record else {
                        debug!(worker, "Sink worker shutting down");
                        break;
                    };
                    write_with_retry(&pool, &record, &config).await;
                }
            });
        }

        Ok(Self { tx: Some(tx), queue_size: config.queue_size })
    }

    /// Sink that drops everything (tests, or no `DATABASE_URL`).
    pub fn disabled() -> Self {
        Self { tx: None, queue_size: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a row without blocking. A full queue dead-letters the row.
    pub fn enqueue(&self, record: TransactionRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                SINK_DEAD_LETTER_TOTAL.inc();
                warn!(transaction = %record.id, "Sink queue full, dropping row to dead letter");
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                warn!(transaction = %record.id, "Sink closed, dropping row");
            }
        }
    }

    /// Wait for the queue to drain, up to `timeout`. Used at shutdown.
    pub async fn flush(&self, timeout: Duration) {
        let Some(tx) = &self.tx else {
            return;
        };
        let deadline = tokio::time::Instant::now() + timeout;
        while tx.capacity() < self.queue_size {
            if tokio::time::Instant::now() >= deadline {
                warn!(pending = self.queue_size - tx.capacity(), "Sink flush timed out");
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn init_schema(pool: &PgPool) -> RiskMeshResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                merchant_id TEXT NOT NULL,
                card_id TEXT,
                transaction_amount DOUBLE PRECISION NOT NULL,
                risk_score DOUBLE PRECISION NOT NULL,
                propagation_depth INTEGER NOT NULL,
                latency_ms DOUBLE PRECISION NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| RiskMeshError::Sink(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions (user_id)")
            .execute(pool)
            .await
            .map_err(|e| RiskMeshError::Sink(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions (timestamp)",
        )
        .execute(pool)
        .await
        .map_err(|e| RiskMeshError::Sink(e.to_string()))?;

        Ok(())
    }
}

async fn write_with_retry(pool: &PgPool, record: &TransactionRecord, config: &SinkConfig) {
    let mut backoff = config.base_backoff;
    for attempt in 1..=config.max_attempts {
        match insert_row(pool, record).await {
            Ok(()) => {
                debug!(transaction = %record.id, "Transaction stored");
                return;
            }
            Err(e) if attempt < config.max_attempts => {
                SINK_RETRIES_TOTAL.inc();
                warn!(
                    transaction = %record.id,
                    attempt,
                    error = %e,
                    "Sink write failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                SINK_DEAD_LETTER_TOTAL.inc();
                error!(
                    transaction = %record.id,
                    attempts = config.max_attempts,
                    error = %e,
                    "Sink write exhausted retries, dropping row to dead letter"
                );
            }
        }
    }
}

async fn insert_row(pool: &PgPool, record: &TransactionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions
            (id, user_id, device_id, ip_address, merchant_id, card_id,
             transaction_amount, risk_score, propagation_depth, latency_ms, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(&record.user_id)
    .bind(&record.device_id)
    .bind(&record.ip_address)
    .bind(&record.merchant_id)
    .bind(&record.card_id)
    .bind(record.transaction_amount)
    .bind(record.risk_score)
    .bind(record.propagation_depth)
    .bind(record.latency_ms)
    .bind(record.timestamp)
    .execute(pool)
    .await?;
    Ok(())
}
