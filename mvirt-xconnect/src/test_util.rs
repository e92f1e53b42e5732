//! Test doubles for chains and the dataplane agent.
//!
//! - `Capture`: records the call context, either as a chain tail or as a
//!   stage that snapshots after everything downstream has run.
//! - `SelectMechanism`: a tail that plays the negotiating peer.
//! - `RecordingAgent`: an in-memory `ConfigAgent` with scriptable failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tonic::Status;

use crate::agent::ConfigAgent;
use crate::chain::{Endpoint, NetworkService, Next};
use crate::connection::{Connection, ConnectionRequest, Mechanism};
use crate::dataplane::{CallContext, DataplaneConfig, KernelInterface};
use crate::error::Result;
use crate::pipeline::settle_mechanism;

/// Call context as observed by a `Capture`.
#[derive(Debug, Clone)]
pub struct Seen {
    pub config: DataplaneConfig,
    pub server_kernel_interface: Option<KernelInterface>,
    pub connection: Connection,
}

impl Seen {
    fn from_ctx(ctx: &CallContext, connection: &Connection) -> Self {
        Self {
            config: ctx.config.clone(),
            server_kernel_interface: ctx.server_kernel_interface.clone(),
            connection: connection.clone(),
        }
    }
}

/// Records every call context it observes.
#[derive(Debug, Default)]
pub struct Capture {
    seen: Mutex<Vec<Seen>>,
}

impl Capture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last(&self) -> Option<Seen> {
        self.seen.lock().unwrap().last().cloned()
    }

    pub fn all(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, ctx: &CallContext, conn: &Connection) {
        self.seen.lock().unwrap().push(Seen::from_ctx(ctx, conn));
    }
}

#[async_trait]
impl Endpoint for Capture {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
    ) -> Result<Connection> {
        self.record(ctx, &request.connection);
        Ok(request.connection)
    }

    async fn close(&self, ctx: &mut CallContext, conn: &mut Connection) -> Result<()> {
        self.record(ctx, conn);
        Ok(())
    }
}

#[async_trait]
impl NetworkService for Capture {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        let conn = next.request(ctx, request).await?;
        self.record(ctx, &conn);
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: &mut Connection,
        next: Next<'_>,
    ) -> Result<()> {
        next.close(ctx, conn).await?;
        self.record(ctx, conn);
        Ok(())
    }
}

/// Tail that settles the connection on a fixed mechanism.
#[derive(Debug)]
pub struct SelectMechanism {
    mechanism: Mechanism,
    preferences: Mutex<Vec<Mechanism>>,
    config: Mutex<Option<DataplaneConfig>>,
}

impl SelectMechanism {
    pub fn new(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            preferences: Mutex::new(Vec::new()),
            config: Mutex::new(None),
        }
    }

    /// Preferences carried by the last request.
    pub fn last_preferences(&self) -> Vec<Mechanism> {
        self.preferences.lock().unwrap().clone()
    }

    /// Accumulator state when the last call reached the tail.
    pub fn last_config(&self) -> Option<DataplaneConfig> {
        self.config.lock().unwrap().clone()
    }
}

#[async_trait]
impl Endpoint for SelectMechanism {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
    ) -> Result<Connection> {
        *self.preferences.lock().unwrap() = request.mechanism_preferences.clone();
        *self.config.lock().unwrap() = Some(ctx.config.clone());
        let mut conn = request.connection;
        let mechanism = settle_mechanism(&self.mechanism, &request.mechanism_preferences);
        conn.mechanism = Some(mechanism);
        Ok(conn)
    }

    async fn close(&self, ctx: &mut CallContext, _conn: &mut Connection) -> Result<()> {
        *self.config.lock().unwrap() = Some(ctx.config.clone());
        Ok(())
    }
}

/// A call received by `RecordingAgent`.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCall {
    Update(DataplaneConfig),
    Delete(DataplaneConfig),
}

/// In-memory dataplane agent.
///
/// The first `fail_updates` update calls fail with `UNAVAILABLE`, as do the
/// first `fail_deletes` delete calls.
#[derive(Debug, Default)]
pub struct RecordingAgent {
    calls: Mutex<Vec<AgentCall>>,
    fail_updates: AtomicU32,
    fail_deletes: AtomicU32,
}

impl RecordingAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_updates(n: u32) -> Arc<Self> {
        let agent = Self::default();
        agent.fail_updates.store(n, Ordering::SeqCst);
        Arc::new(agent)
    }

    pub fn failing_deletes(n: u32) -> Arc<Self> {
        let agent = Self::default();
        agent.fail_deletes.store(n, Ordering::SeqCst);
        Arc::new(agent)
    }

    /// Every call received, failed ones included.
    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn update_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AgentCall::Update(_)))
            .count()
    }

    pub fn delete_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AgentCall::Delete(_)))
            .count()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ConfigAgent for RecordingAgent {
    async fn update(&self, config: &DataplaneConfig) -> std::result::Result<(), Status> {
        self.calls
            .lock()
            .unwrap()
            .push(AgentCall::Update(config.clone()));
        if Self::take_failure(&self.fail_updates) {
            return Err(Status::unavailable("memif socket not ready"));
        }
        Ok(())
    }

    async fn delete(&self, config: &DataplaneConfig) -> std::result::Result<(), Status> {
        self.calls
            .lock()
            .unwrap()
            .push(AgentCall::Delete(config.clone()));
        if Self::take_failure(&self.fail_deletes) {
            return Err(Status::unavailable("agent busy"));
        }
        Ok(())
    }
}
