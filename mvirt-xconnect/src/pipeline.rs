//! Stage lists for the two roles a dataplane can play in a connection.
//!
//! - Endpoint: terminates the connection into a local workload.
//!   `[commit, kernel, memif, vxlan, address]`, all server stages.
//! - Forwarder: carries the connection on to the next hop.
//!   `[commit, kernel, memif, vxlan servers, l3 cross-connect, kernel, memif,
//!   vxlan clients]`.
//!
//! Commit is always first so that it runs after everything else has appended
//! its stanzas. The cross-connect stage precedes the client mechanism stages
//! so that it sees both the incoming and the outgoing interface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::ConfigAgent;
use crate::chain::{Chain, Endpoint, NetworkService};
use crate::commit::CommitClient;
use crate::config::XconnectConfig;
use crate::connection::{Connection, ConnectionRequest, Mechanism};
use crate::dataplane::CallContext;
use crate::error::Result;
use crate::ipaddress::IpAddressServer;
use crate::mechanisms::{
    KernelClient, KernelServer, KernelTemplate, MemifClient, MemifServer, VxlanClient,
    VxlanServer,
};
use crate::xconnect::L3XconnectClient;

/// Which stage list to compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Endpoint,
    Forwarder,
}

/// Builds chains from one configuration, agent and kernel template.
pub struct ChainBuilder<'a> {
    config: &'a XconnectConfig,
    agent: Arc<dyn ConfigAgent>,
    template: KernelTemplate,
}

impl<'a> ChainBuilder<'a> {
    /// `template` is resolved by the caller, typically once via
    /// `KernelTemplate::detect`.
    pub fn new(
        config: &'a XconnectConfig,
        agent: Arc<dyn ConfigAgent>,
        template: KernelTemplate,
    ) -> Self {
        Self {
            config,
            agent,
            template,
        }
    }

    pub fn stages(&self, role: Role) -> Vec<Arc<dyn NetworkService>> {
        let mut stages: Vec<Arc<dyn NetworkService>> = vec![
            Arc::new(CommitClient::new(
                Arc::clone(&self.agent),
                self.config.commit_retry.policy(),
            )),
            Arc::new(KernelServer::new(self.template)),
            Arc::new(MemifServer::new(self.config.memif_socket_dir.clone())),
        ];
        if let Some(local_ip) = self.config.vxlan_local_ip {
            stages.push(Arc::new(VxlanServer::new(local_ip)));
        }
        match role {
            Role::Endpoint => stages.push(Arc::new(IpAddressServer::new())),
            Role::Forwarder => {
                stages.push(Arc::new(L3XconnectClient::new()));
                stages.push(Arc::new(KernelClient::new(self.template)));
                stages.push(Arc::new(MemifClient::new()));
                if let Some(local_ip) = self.config.vxlan_local_ip {
                    stages.push(Arc::new(VxlanClient::new(local_ip)));
                }
            }
        }
        stages
    }

    pub fn build(&self, role: Role, tail: Arc<dyn Endpoint>) -> Chain {
        Chain::with_tail(self.stages(role), tail)
    }
}

/// The mechanism a peer settles on: `selected`, completed with whatever
/// parameters the requester offered for the same mechanism type.
pub fn settle_mechanism(selected: &Mechanism, preferences: &[Mechanism]) -> Mechanism {
    let mut mechanism = selected.clone();
    if let Some(offered) = preferences
        .iter()
        .find(|m| m.mechanism_type == mechanism.mechanism_type)
    {
        for (k, v) in &offered.parameters {
            mechanism
                .parameters
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
    }
    mechanism
}

/// Chain tail standing in for a next hop that has already agreed on a
/// mechanism.
///
/// Close has no preferences to complete the mechanism from, so `mechanism`
/// must carry every parameter the client stages read.
#[derive(Debug, Clone)]
pub struct FixedPeer {
    mechanism: Mechanism,
}

impl FixedPeer {
    pub fn new(mechanism: Mechanism) -> Self {
        Self { mechanism }
    }
}

#[async_trait]
impl Endpoint for FixedPeer {
    async fn request(
        &self,
        _ctx: &mut CallContext,
        request: ConnectionRequest,
    ) -> Result<Connection> {
        let mut conn = request.connection;
        conn.mechanism = Some(settle_mechanism(
            &self.mechanism,
            &request.mechanism_preferences,
        ));
        Ok(conn)
    }

    async fn close(&self, _ctx: &mut CallContext, conn: &mut Connection) -> Result<()> {
        conn.mechanism = Some(self.mechanism.clone());
        Ok(())
    }
}

/// Close `conn` on `chain`, leaving its incoming mechanism in place.
///
/// A `FixedPeer` tail swaps in the outgoing mechanism for the client stages;
/// the caller still holds the connection it was handed.
pub async fn close_incoming(
    chain: &Chain,
    conn: &mut Connection,
    cancel: CancellationToken,
) -> Result<()> {
    let incoming = conn.mechanism.clone();
    let result = chain.close(conn, cancel).await;
    conn.mechanism = incoming;
    result
}
