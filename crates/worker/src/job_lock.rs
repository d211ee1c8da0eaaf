//! Cross-instance job exclusion with Postgres session advisory locks
//!
//! The lock lives on one pooled connection for the duration of a run. If a lock is
//! dropped without being released, that connection is detached and closed so the
//! server ends the session and frees the lock.

use std::future::Future;

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{error, info, warn};

pub struct JobLock {
    name: &'static str,
    conn: Option<PoolConnection<Postgres>>,
}

impl JobLock {
    /// Take the lock for `name`, or `None` if another session holds it
    pub async fn try_acquire(pool: &PgPool, name: &'static str) -> Result<Option<Self>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;

        Ok(acquired.then(|| Self {
            name,
            conn: Some(conn),
        }))
    }

    pub async fn release(mut self) -> Result<(), sqlx::Error> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let result = sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(self.name)
            .execute(&mut *conn)
            .await;
        if result.is_err() {
            // Never hand a connection that may still hold the lock back to the pool
            drop(conn.detach());
        }
        result.map(|_| ())
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(job = self.name, "Job lock dropped without release, closing its connection");
            drop(conn.detach());
        }
    }
}

/// Run `job` only if no other worker instance is running the job of the same name
pub async fn run_exclusive<F, Fut>(pool: &PgPool, name: &'static str, job: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let lock = match JobLock::try_acquire(pool, name).await {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            info!(job = name, "Skipping run, another worker holds the job lock");
            return;
        }
        Err(e) => {
            error!(job = name, error = %e, "Failed to take job lock");
            return;
        }
    };

    job().await;

    if let Err(e) = lock.release().await {
        error!(job = name, error = %e, "Failed to release job lock");
    }
}
