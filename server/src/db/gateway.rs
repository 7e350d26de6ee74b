//! Persistence gateway: the single owner of the connection pool.
//!
//! Business code never touches the pool directly. Single statements run on a
//! connection from [`Gateway::acquire`]; multi-statement writes run inside a
//! [`UnitOfWork`] from [`Gateway::begin`]. Both wait for database readiness
//! with a bounded number of liveness checks and fail with
//! [`GatewayError::ServiceUnavailable`] instead of hanging.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use thiserror::Error;

use crate::config::DbConfig;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No connection could be obtained. Safe to retry later.
    #[error("database connection unavailable")]
    Connection(#[source] sqlx::Error),

    #[error("database not ready after {attempts} attempt(s)")]
    ServiceUnavailable { attempts: u32 },

    /// The statement itself failed. Retrying will not help.
    #[error("database statement failed")]
    Query(#[source] sqlx::Error),
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => GatewayError::Connection(err),
            err => GatewayError::Query(err),
        }
    }
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection(_) | GatewayError::ServiceUnavailable { .. }
        )
    }

    fn violated(&self, code: &str) -> Option<&str> {
        match self {
            GatewayError::Query(sqlx::Error::Database(db)) if db.code().as_deref() == Some(code) => {
                Some(db.constraint().unwrap_or_default())
            }
            _ => None,
        }
    }

    /// Name of the violated unique constraint, if that is what failed.
    pub fn unique_violation(&self) -> Option<&str> {
        self.violated(UNIQUE_VIOLATION)
    }

    /// Name of the violated foreign key, if that is what failed.
    pub fn foreign_key_violation(&self) -> Option<&str> {
        self.violated(FOREIGN_KEY_VIOLATION)
    }
}

/// How long callers wait for a database that is not ready yet.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

pub struct Gateway {
    pool: PgPool,
    ready: AtomicBool,
    policy: ReadinessPolicy,
}

impl Gateway {
    /// Builds the pool without opening a connection; call [`Gateway::ping`]
    /// or [`Gateway::await_ready`] to find out whether the database answers.
    pub fn connect_lazy(config: &DbConfig<'_>) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy(&config.connection_string())
            .map_err(GatewayError::Connection)?;

        Ok(Self::from_pool(
            pool,
            ReadinessPolicy {
                retries: config.ready_retries,
                backoff: config.ready_backoff,
            },
        ))
    }

    pub fn from_pool(pool: PgPool, policy: ReadinessPolicy) -> Self {
        Self {
            pool,
            ready: AtomicBool::new(false),
            policy,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Liveness check (`SELECT 1`). Records and returns the outcome.
    pub async fn ping(&self) -> bool {
        let alive = match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "database liveness check failed");
                false
            }
        };
        let was_ready = self.ready.swap(alive, Ordering::AcqRel);
        if alive && !was_ready {
            tracing::info!("✓ Database ready");
        }
        alive
    }

    /// Checks until the database answers, at most `retries` times with a
    /// growing pause between attempts.
    pub async fn await_ready(&self) -> Result<(), GatewayError> {
        if self.is_ready() {
            return Ok(());
        }

        let attempts = self.policy.retries.max(1);
        for attempt in 1..=attempts {
            if self.ping().await {
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff * attempt).await;
            }
        }

        tracing::error!(attempts, "database unavailable");
        Err(GatewayError::ServiceUnavailable { attempts })
    }

    fn note_failure(&self, err: &GatewayError) {
        if matches!(err, GatewayError::Connection(_)) {
            self.ready.store(false, Ordering::Release);
        }
    }

    /// One pooled connection for single statements.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, GatewayError> {
        self.await_ready().await?;
        self.pool.acquire().await.map_err(|e| {
            let err = GatewayError::from(e);
            self.note_failure(&err);
            err
        })
    }

    /// Opens a transaction on a single pooled connection.
    pub async fn begin(&self, label: &'static str) -> Result<UnitOfWork, GatewayError> {
        self.await_ready().await?;
        let tx = self.pool.begin().await.map_err(|e| {
            let err = GatewayError::from(e);
            self.note_failure(&err);
            err
        })?;
        tracing::debug!(unit = label, "transaction opened");
        Ok(UnitOfWork {
            tx,
            label,
            steps: 0,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Waits for checked-out connections to return, then closes the pool.
    pub async fn close(&self) {
        self.ready.store(false, Ordering::Release);
        self.pool.close().await;
        tracing::info!("database pool closed");
    }
}

/// An open transaction. Dropping it without [`UnitOfWork::commit`] rolls
/// back, and the connection goes back to the pool in every case.
pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
    label: &'static str,
    steps: usize,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("label", &self.label)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// The transaction's connection for the next statement.
    pub fn conn(&mut self) -> &mut PgConnection {
        self.steps += 1;
        &mut *self.tx
    }

    pub async fn commit(self) -> Result<(), GatewayError> {
        let (label, steps) = (self.label, self.steps);
        self.tx.commit().await?;
        tracing::debug!(unit = label, steps, "transaction committed");
        Ok(())
    }

    pub async fn rollback(self) {
        let (label, steps) = (self.label, self.steps);
        match self.tx.rollback().await {
            Ok(()) => tracing::warn!(unit = label, steps, "transaction rolled back"),
            Err(e) => tracing::error!(unit = label, error = %e, "rollback failed; connection discarded"),
        }
    }
}
