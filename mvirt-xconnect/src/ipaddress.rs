//! Sets the connection's destination address on the dataplane side of the
//! interface plugged into the endpoint.

use async_trait::async_trait;
use tracing::debug;

use crate::chain::{NetworkService, Next};
use crate::connection::{Connection, ConnectionRequest};
use crate::dataplane::{CallContext, DataplaneConfig};
use crate::error::Result;

/// Server-side stage; must follow the mechanism server stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpAddressServer;

impl IpAddressServer {
    pub fn new() -> Self {
        Self
    }
}

/// Replace the address list of the last forwarding interface with `conn`'s
/// destination address, taken as is.
pub fn set_dataplane_address(config: &mut DataplaneConfig, conn: &Connection) {
    let dst = &conn.ip_context.dst_ip_addr;
    if dst.is_empty() {
        return;
    }
    if let Some(iface) = config.last_forwarding_interface_mut() {
        debug!(conn_id = %conn.id, iface = %iface.name, addr = %dst, "Setting interface address");
        iface.ip_addresses = vec![dst.clone()];
    }
}

#[async_trait]
impl NetworkService for IpAddressServer {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        set_dataplane_address(&mut ctx.config, &request.connection);
        next.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: &mut Connection,
        next: Next<'_>,
    ) -> Result<()> {
        set_dataplane_address(&mut ctx.config, conn);
        next.close(ctx, conn).await
    }
}
