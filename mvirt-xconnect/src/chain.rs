//! Static composition of connection stages.
//!
//! A `Chain` is an ordered list of `NetworkService` stages followed by an
//! `Endpoint` tail. Each stage receives a `Next` handle for the remainder of
//! the chain and decides whether to mutate before or after delegating:
//! server-side stages mutate first, client-side stages delegate first.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::{Connection, ConnectionRequest};
use crate::dataplane::CallContext;
use crate::error::Result;

/// A stage in a request/close chain.
#[async_trait]
pub trait NetworkService: Send + Sync {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection>;

    async fn close(&self, ctx: &mut CallContext, conn: &mut Connection, next: Next<'_>)
    -> Result<()>;
}

/// What lies beyond the last stage: the peer that completes negotiation.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn request(&self, ctx: &mut CallContext, request: ConnectionRequest)
    -> Result<Connection>;

    async fn close(&self, ctx: &mut CallContext, conn: &mut Connection) -> Result<()>;
}

/// Tail that accepts the connection as requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct Terminal;

#[async_trait]
impl Endpoint for Terminal {
    async fn request(
        &self,
        _ctx: &mut CallContext,
        request: ConnectionRequest,
    ) -> Result<Connection> {
        Ok(request.connection)
    }

    async fn close(&self, _ctx: &mut CallContext, _conn: &mut Connection) -> Result<()> {
        Ok(())
    }
}

/// Handle to the remainder of a chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn NetworkService>],
    tail: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn NetworkService>], tail: &'a dyn Endpoint) -> Self {
        Self { stages, tail }
    }

    pub async fn request(
        self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
    ) -> Result<Connection> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.request(ctx, request, Next::new(rest, self.tail)).await,
            None => self.tail.request(ctx, request).await,
        }
    }

    pub async fn close(self, ctx: &mut CallContext, conn: &mut Connection) -> Result<()> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.close(ctx, conn, Next::new(rest, self.tail)).await,
            None => self.tail.close(ctx, conn).await,
        }
    }
}

/// An ordered list of stages with a tail.
pub struct Chain {
    stages: Vec<Arc<dyn NetworkService>>,
    tail: Arc<dyn Endpoint>,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn NetworkService>>) -> Self {
        Self::with_tail(stages, Arc::new(Terminal))
    }

    pub fn with_tail(stages: Vec<Arc<dyn NetworkService>>, tail: Arc<dyn Endpoint>) -> Self {
        Self { stages, tail }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run a request through a fresh call context.
    pub async fn request(
        &self,
        request: ConnectionRequest,
        cancel: CancellationToken,
    ) -> Result<Connection> {
        let mut ctx = CallContext::new(cancel);
        debug!(conn_id = %request.connection.id, stages = self.stages.len(), "Request");
        Next::new(&self.stages, self.tail.as_ref())
            .request(&mut ctx, request)
            .await
    }

    /// Run a close through a fresh call context.
    pub async fn close(&self, conn: &mut Connection, cancel: CancellationToken) -> Result<()> {
        let mut ctx = CallContext::new(cancel);
        debug!(conn_id = %conn.id, stages = self.stages.len(), "Close");
        Next::new(&self.stages, self.tail.as_ref())
            .close(&mut ctx, conn)
            .await
    }
}
