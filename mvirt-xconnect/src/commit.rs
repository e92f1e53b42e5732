//! Pushes the accumulated configuration to the dataplane agent.
//!
//! The commit stage delegates first, so by the time it runs every other stage
//! of the call has appended its stanzas. Request sends `Update`, close sends
//! `Delete` with the configuration re-derived by the close pass.
//!
//! Memif needs special care: the agent may acknowledge a memif master before
//! its socket is actually listening, which makes the slave side fail. Updates
//! for memif connections are therefore retried per `RetryPolicy` until they
//! succeed, the policy gives up, or the call is cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::Status;
use tracing::{info, warn};

use crate::agent::ConfigAgent;
use crate::chain::{NetworkService, Next};
use crate::connection::{Connection, ConnectionRequest, MechanismType};
use crate::dataplane::CallContext;
use crate::error::{Error, Result};

/// Retry behavior for updates that hit the memif readiness race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry immediately until the call is cancelled.
    Unbounded,
    /// Give up after `max_attempts` calls in total, waiting `delay` between them.
    Bounded { max_attempts: u32, delay: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Bounded {
            max_attempts: 50,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Whether another call may follow `attempts` failed ones.
    fn allows(&self, attempts: u32) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Bounded { max_attempts, .. } => attempts < *max_attempts,
        }
    }

    fn delay(&self) -> Duration {
        match self {
            RetryPolicy::Unbounded => Duration::ZERO,
            RetryPolicy::Bounded { delay, .. } => *delay,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Update,
    Delete,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Commit stage.
pub struct CommitClient {
    agent: Arc<dyn ConfigAgent>,
    retry: RetryPolicy,
}

impl CommitClient {
    pub fn new(agent: Arc<dyn ConfigAgent>, retry: RetryPolicy) -> Self {
        Self { agent, retry }
    }

    async fn call(&self, ctx: &CallContext, op: Operation) -> std::result::Result<(), Status> {
        let call = async {
            match op {
                Operation::Update => self.agent.update(&ctx.config).await,
                Operation::Delete => self.agent.delete(&ctx.config).await,
            }
        };
        tokio::select! {
            biased;
            result = call => result,
            _ = ctx.cancellation().cancelled() => Err(Status::cancelled("call cancelled")),
        }
    }

    fn wrap(ctx: &CallContext, op: Operation, source: Status) -> Error {
        Error::Commit {
            operation: op.as_str(),
            config: ctx.config.to_json(),
            source,
        }
    }

    async fn update(&self, ctx: &CallContext, conn: &Connection) -> Result<()> {
        let retryable = conn.mechanism_type() == Some(MechanismType::Memif);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let status = match self.call(ctx, Operation::Update).await {
                Ok(()) => {
                    info!(conn_id = %conn.id, attempts, "Committed dataplane config");
                    return Ok(());
                }
                Err(status) => status,
            };
            if !retryable || ctx.is_cancelled() || !self.retry.allows(attempts) {
                return Err(Self::wrap(ctx, Operation::Update, status));
            }
            warn!(conn_id = %conn.id, attempts, error = %status, "Memif config not accepted yet, retrying");
            let delay = self.retry.delay();
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancellation().cancelled() => {
                        return Err(Self::wrap(ctx, Operation::Update, status));
                    }
                }
            }
        }
    }

    async fn delete(&self, ctx: &CallContext, conn: &Connection) -> Result<()> {
        self.call(ctx, Operation::Delete)
            .await
            .map_err(|status| Self::wrap(ctx, Operation::Delete, status))?;
        info!(conn_id = %conn.id, "Deleted dataplane config");
        Ok(())
    }
}

#[async_trait]
impl NetworkService for CommitClient {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        let conn = next.request(ctx, request).await?;
        self.update(ctx, &conn).await?;
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: &mut Connection,
        next: Next<'_>,
    ) -> Result<()> {
        next.close(ctx, conn).await?;
        self.delete(ctx, conn).await
    }
}
