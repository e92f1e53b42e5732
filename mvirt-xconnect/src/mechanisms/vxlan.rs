//! Vxlan mechanism: a tunnel across the underlay between client and server.
//!
//! `src_ip` and `dst_ip` are always relative to the client, so the server
//! swaps them when building its side of the tunnel.

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

use crate::chain::{NetworkService, Next};
use crate::connection::{
    Connection, ConnectionRequest, Mechanism, MechanismClass, MechanismType, params,
};
use crate::dataplane::{CallContext, ForwardingInterface, ForwardingLink};
use crate::error::Result;

/// Server side of the vxlan mechanism.
#[derive(Debug, Clone, Copy)]
pub struct VxlanServer {
    local_ip: IpAddr,
}

impl VxlanServer {
    /// `local_ip` is the server's underlay address, i.e. the client's destination.
    pub fn new(local_ip: IpAddr) -> Self {
        Self { local_ip }
    }

    fn append(&self, ctx: &mut CallContext, conn: &mut Connection) -> Result<()> {
        let id = conn.id.clone();
        if let Some(mechanism) = conn.mechanism_of_mut(MechanismType::Vxlan) {
            // Parse everything before touching the mechanism or the accumulator.
            let vni = mechanism.vni()?;
            let client_ip = mechanism.ip_parameter(params::SRC_IP)?;
            mechanism.set_parameter(params::DST_IP, self.local_ip.to_string());
            debug!(conn_id = %id, vni, src = %self.local_ip, dst = %client_ip, "Appending vxlan tunnel");
            ctx.config.push_forwarding_interface(ForwardingInterface::new(
                format!("server-{id}"),
                ForwardingLink::Vxlan {
                    src_address: self.local_ip.to_string(),
                    dst_address: client_ip.to_string(),
                    vni,
                },
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkService for VxlanServer {
    async fn request(
        &self,
        ctx: &mut CallContext,
        mut request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        self.append(ctx, &mut request.connection)?;
        next.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: &mut Connection,
        next: Next<'_>,
    ) -> Result<()> {
        self.append(ctx, conn)?;
        next.close(ctx, conn).await
    }
}

/// Client side of the vxlan mechanism.
#[derive(Debug, Clone, Copy)]
pub struct VxlanClient {
    local_ip: IpAddr,
}

impl VxlanClient {
    pub fn new(local_ip: IpAddr) -> Self {
        Self { local_ip }
    }

    fn append(&self, ctx: &mut CallContext, conn: &Connection) -> Result<()> {
        if let Some(mechanism) = conn.mechanism_of(MechanismType::Vxlan) {
            let vni = mechanism.vni()?;
            let src = mechanism.ip_parameter(params::SRC_IP)?;
            let dst = mechanism.ip_parameter(params::DST_IP)?;
            debug!(conn_id = %conn.id, vni, %src, %dst, "Appending vxlan tunnel");
            ctx.config.push_forwarding_interface(ForwardingInterface::new(
                format!("client-{}", conn.id),
                ForwardingLink::Vxlan {
                    src_address: src.to_string(),
                    dst_address: dst.to_string(),
                    vni,
                },
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkService for VxlanClient {
    async fn request(
        &self,
        ctx: &mut CallContext,
        mut request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        request.mechanism_preferences.push(
            Mechanism::new(MechanismClass::Remote, MechanismType::Vxlan)
                .with_parameter(params::SRC_IP, self.local_ip.to_string()),
        );
        let conn = next.request(ctx, request).await?;
        self.append(ctx, &conn)?;
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: &mut Connection,
        next: Next<'_>,
    ) -> Result<()> {
        next.close(ctx, conn).await?;
        self.append(ctx, conn)
    }
}
