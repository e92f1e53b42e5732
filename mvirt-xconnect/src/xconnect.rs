//! L3 cross-connect between the two most recently appended dataplane
//! interfaces, with proxy-ARP for the connection's addresses.
//!
//! Only IPv4 ARP is handled; IPv6 neighbor discovery and ranges wider than a
//! single address are not.

use async_trait::async_trait;
use tracing::debug;

use crate::chain::{NetworkService, Next};
use crate::connection::{Connection, ConnectionRequest};
use crate::dataplane::{CallContext, CrossConnect, CrossConnectPath, DataplaneConfig, ProxyArpRange};
use crate::error::Result;

/// Client-side stage stitching the incoming and outgoing interface together.
///
/// Must sit outside (before) the mechanism client stages in the chain, so
/// that both interfaces exist when it runs on the way back.
#[derive(Debug, Clone, Copy, Default)]
pub struct L3XconnectClient;

impl L3XconnectClient {
    pub fn new() -> Self {
        Self
    }
}

/// Cross-connect the last two forwarding interfaces of `config`.
pub fn append_l3_xconnect(config: &mut DataplaneConfig, conn: &Connection) {
    if !conn.is_ip_payload() {
        return;
    }
    let Some((a, b)) = config.last_two_forwarding_interfaces() else {
        return;
    };
    let (a, b) = (a.name.clone(), b.name.clone());

    let ip = &conn.ip_context;
    let dst = ip.dst_addr().map(str::to_string);
    let src = ip.src_addr().map(str::to_string);

    debug!(conn_id = %conn.id, %a, %b, ?src, ?dst, "Appending l3 cross-connect");

    // A forwards to B towards the source, B forwards to A towards the destination.
    config.push_cross_connect(CrossConnect {
        interface: a.clone(),
        paths: vec![CrossConnectPath {
            outgoing_interface: b.clone(),
            next_hop_addr: src.clone(),
        }],
    });
    config.push_cross_connect(CrossConnect {
        interface: b.clone(),
        paths: vec![CrossConnectPath {
            outgoing_interface: a.clone(),
            next_hop_addr: dst.clone(),
        }],
    });

    if dst.is_none() && src.is_none() {
        return;
    }
    let arp = config.proxy_arp_mut();
    arp.interfaces.push(a);
    arp.interfaces.push(b);
    if let Some(dst) = dst {
        arp.ranges.push(ProxyArpRange::single(dst));
    }
    if let Some(src) = src {
        arp.ranges.push(ProxyArpRange::single(src));
    }
}

#[async_trait]
impl NetworkService for L3XconnectClient {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        let conn = next.request(ctx, request).await?;
        append_l3_xconnect(&mut ctx.config, &conn);
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: &mut Connection,
        next: Next<'_>,
    ) -> Result<()> {
        next.close(ctx, conn).await?;
        append_l3_xconnect(&mut ctx.config, conn);
        Ok(())
    }
}
