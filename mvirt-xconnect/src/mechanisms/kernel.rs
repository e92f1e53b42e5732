//! Kernel mechanism: bridges a kernel interface in the workload's network
//! namespace into the dataplane.
//!
//! Two templates produce the stanzas:
//! - `VethPair`: a veth pair (one end in the target namespace, one in the
//!   root namespace) plus an AF_PACKET dataplane interface on the root end.
//!   Always works.
//! - `Tap`: a dataplane tap v2 interface whose kernel side is placed directly
//!   in the target namespace. Needs vhost-net on the host, but saves a hop.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::chain::{NetworkService, Next};
use crate::connection::{
    Connection, ConnectionRequest, Mechanism, MechanismClass, MechanismType, linux_if_name, params,
};
use crate::dataplane::{
    CallContext, DataplaneConfig, ForwardingInterface, ForwardingLink, KernelInterface,
    KernelInterfaceType, KernelLink,
};
use crate::error::Result;

/// Device whose presence enables the tap template.
pub const VHOST_NET_DEVICE: &str = "/dev/vhost-net";

/// How a kernel interface is plumbed into the dataplane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelTemplate {
    #[default]
    VethPair,
    Tap,
}

impl KernelTemplate {
    /// Pick the tap template if `device` exists, veth otherwise.
    ///
    /// Meant to be evaluated once by whoever composes the chain.
    pub fn detect(device: &Path) -> Self {
        if device.exists() {
            KernelTemplate::Tap
        } else {
            KernelTemplate::VethPair
        }
    }

    /// Append the stanzas for dataplane interface `name`, whose kernel side is
    /// called `if_name` inside namespace `netns`.
    pub fn apply(self, config: &mut DataplaneConfig, name: &str, if_name: &str, netns: &str) {
        match self {
            KernelTemplate::VethPair => veth_pair(config, name, if_name, netns),
            KernelTemplate::Tap => tap(config, name, if_name, netns),
        }
    }
}

fn veth_pair(config: &mut DataplaneConfig, name: &str, if_name: &str, netns: &str) {
    let root_end = format!("{name}-veth");
    config.push_kernel_interface(KernelInterface {
        name: root_end.clone(),
        if_type: KernelInterfaceType::Veth,
        enabled: true,
        host_if_name: linux_if_name(name),
        namespace: None,
        link: KernelLink::Veth {
            peer_if_name: name.to_string(),
            checksum_offload: false,
        },
    });
    config.push_kernel_interface(KernelInterface {
        name: name.to_string(),
        if_type: KernelInterfaceType::Veth,
        enabled: true,
        host_if_name: linux_if_name(if_name),
        namespace: Some(netns.to_string()),
        link: KernelLink::Veth {
            peer_if_name: root_end,
            checksum_offload: false,
        },
    });
    config.push_forwarding_interface(ForwardingInterface::new(
        name,
        ForwardingLink::AfPacket {
            host_if_name: linux_if_name(name),
        },
    ));
}

fn tap(config: &mut DataplaneConfig, name: &str, if_name: &str, netns: &str) {
    config.push_forwarding_interface(ForwardingInterface::new(
        name,
        ForwardingLink::Tap { version: 2 },
    ));
    config.push_kernel_interface(KernelInterface {
        name: name.to_string(),
        if_type: KernelInterfaceType::TapToDataplane,
        enabled: true,
        host_if_name: linux_if_name(if_name),
        namespace: Some(netns.to_string()),
        link: KernelLink::Tap {
            dataplane_tap_if_name: name.to_string(),
        },
    });
}

/// Validate the mechanism and apply the template. Nothing is appended on error.
fn append_interface_config(
    template: KernelTemplate,
    config: &mut DataplaneConfig,
    name: &str,
    conn: &Connection,
    mechanism: &Mechanism,
) -> Result<()> {
    let netns = mechanism.file_url_path(params::NETNS_URL)?;
    let if_name = mechanism.interface_name(conn);
    debug!(name, if_name = %if_name, netns = %netns, ?template, "Appending kernel interface");
    template.apply(config, name, &if_name, &netns);
    Ok(())
}

/// Client side of the kernel mechanism.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelClient {
    template: KernelTemplate,
}

impl KernelClient {
    pub fn new(template: KernelTemplate) -> Self {
        Self { template }
    }

    fn append(&self, ctx: &mut CallContext, conn: &Connection) -> Result<()> {
        if let Some(mechanism) = conn.mechanism_of(MechanismType::Kernel) {
            let name = format!("client-{}", conn.id);
            append_interface_config(self.template, &mut ctx.config, &name, conn, mechanism)?;
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkService for KernelClient {
    async fn request(
        &self,
        ctx: &mut CallContext,
        mut request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        request
            .mechanism_preferences
            .push(Mechanism::new(MechanismClass::Local, MechanismType::Kernel));
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

/// Server side of the kernel mechanism.
///
/// Records the kernel interface it creates in `CallContext::server_kernel_interface`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelServer {
    template: KernelTemplate,
}

impl KernelServer {
    pub fn new(template: KernelTemplate) -> Self {
        Self { template }
    }

    fn append(&self, ctx: &mut CallContext, conn: &Connection) -> Result<()> {
        if let Some(mechanism) = conn.mechanism_of(MechanismType::Kernel) {
            let name = format!("server-{}", conn.id);
            append_interface_config(self.template, &mut ctx.config, &name, conn, mechanism)?;
            ctx.server_kernel_interface = ctx.config.last_kernel_interface().cloned();
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkService for KernelServer {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        self.append(ctx, &request.connection)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, Endpoint};
    use crate::connection::LINUX_IF_MAX_LENGTH;
    use crate::dataplane::ForwardingInterfaceType;
    use crate::error::Error;
    use crate::test_util::{Capture, SelectMechanism};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn kernel_mechanism(netns: &str) -> Mechanism {
        Mechanism::new(MechanismClass::Local, MechanismType::Kernel)
            .with_parameter(params::NETNS_URL, netns)
            .with_parameter(params::INTERFACE_NAME, "nsm-1")
    }

    fn kernel_request(id: &str) -> ConnectionRequest {
        let mut conn = Connection::new(id);
        conn.mechanism = Some(kernel_mechanism("file:///proc/42/ns/net"));
        ConnectionRequest::new(conn)
    }

    #[test]
    fn test_veth_pair_template() {
        let mut config = DataplaneConfig::new();
        KernelTemplate::VethPair.apply(&mut config, "server-c1", "nsm-1", "/proc/42/ns/net");

        let kernel = config.kernel_interfaces();
        assert_eq!(kernel.len(), 2);
        assert_eq!(kernel[0].name, "server-c1-veth");
        assert_eq!(kernel[0].host_if_name, "server-c1");
        assert_eq!(kernel[0].namespace, None);
        assert_eq!(kernel[1].name, "server-c1");
        assert_eq!(kernel[1].host_if_name, "nsm-1");
        assert_eq!(kernel[1].namespace.as_deref(), Some("/proc/42/ns/net"));
        assert_eq!(
            kernel[1].link,
            KernelLink::Veth {
                peer_if_name: "server-c1-veth".into(),
                checksum_offload: false
            }
        );

        let fwd = config.forwarding_interfaces();
        assert_eq!(fwd.len(), 1);
        assert_eq!(fwd[0].if_type, ForwardingInterfaceType::AfPacket);
        assert_eq!(
            fwd[0].link,
            ForwardingLink::AfPacket {
                host_if_name: "server-c1".into()
            }
        );
    }

    #[test]
    fn test_tap_template() {
        let mut config = DataplaneConfig::new();
        KernelTemplate::Tap.apply(&mut config, "client-c1", "nsm-1", "/proc/42/ns/net");

        let fwd = config.forwarding_interfaces();
        assert_eq!(fwd.len(), 1);
        assert_eq!(fwd[0].if_type, ForwardingInterfaceType::Tap);

        let kernel = config.kernel_interfaces();
        assert_eq!(kernel.len(), 1);
        assert_eq!(kernel[0].if_type, KernelInterfaceType::TapToDataplane);
        assert_eq!(
            kernel[0].link,
            KernelLink::Tap {
                dataplane_tap_if_name: "client-c1".into()
            }
        );
    }

    #[test]
    fn test_host_name_truncated() {
        let mut config = DataplaneConfig::new();
        let name = "server-a-very-long-connection-id";
        for _ in 0..2 {
            KernelTemplate::VethPair.apply(&mut config, name, "nsm-1", "/ns");
        }
        let kernel = config.kernel_interfaces();
        assert_eq!(kernel[0].host_if_name, "server-a-very-l");
        assert_eq!(kernel[0].host_if_name.len(), LINUX_IF_MAX_LENGTH);
        assert_eq!(kernel[0].host_if_name, kernel[2].host_if_name);
    }

    #[test]
    fn test_detect_missing_device() {
        let template = KernelTemplate::detect(Path::new("/nonexistent/vhost-net"));
        assert_eq!(template, KernelTemplate::VethPair);
    }

    #[test]
    fn test_detect_existing_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(KernelTemplate::detect(file.path()), KernelTemplate::Tap);
    }

    #[tokio::test]
    async fn test_server_appends_and_records_interface() {
        let capture = Capture::new();
        let chain = Chain::with_tail(
            vec![Arc::new(KernelServer::new(KernelTemplate::VethPair))],
            capture.clone(),
        );
        chain
            .request(kernel_request("c1"), CancellationToken::new())
            .await
            .unwrap();

        let seen = capture.last().unwrap();
        assert_eq!(seen.config.forwarding_interfaces()[0].name, "server-c1");
        let recorded = seen.server_kernel_interface.unwrap();
        assert_eq!(recorded.name, "server-c1");
        assert_eq!(recorded.host_if_name, "nsm-1");
    }

    #[tokio::test]
    async fn test_server_rejects_non_file_netns() {
        let capture = Capture::new();
        let chain = Chain::with_tail(
            vec![Arc::new(KernelServer::default())],
            capture.clone(),
        );
        let mut request = kernel_request("c1");
        request.connection.mechanism = Some(kernel_mechanism("inode://4/4026531992"));

        let err = chain
            .request(request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidMechanismParameter {
                key: params::NETNS_URL,
                ..
            }
        ));
        // Never reached the tail.
        assert!(capture.last().is_none());
    }

    #[tokio::test]
    async fn test_server_ignores_other_mechanisms() {
        let capture = Capture::new();
        let chain = Chain::with_tail(vec![Arc::new(KernelServer::default())], capture.clone());
        let mut request = kernel_request("c1");
        request.connection.mechanism =
            Some(Mechanism::new(MechanismClass::Local, MechanismType::Memif));
        chain.request(request, CancellationToken::new()).await.unwrap();
        let seen = capture.last().unwrap();
        assert!(seen.config.is_empty());
        assert!(seen.server_kernel_interface.is_none());
    }

    #[tokio::test]
    async fn test_client_advertises_preference_and_appends_after() {
        let capture = Capture::new();
        let tail = Arc::new(SelectMechanism::new(kernel_mechanism("file:///proc/7/ns/net")));
        let chain = Chain::with_tail(
            vec![
                capture.clone(),
                Arc::new(KernelClient::new(KernelTemplate::Tap)),
            ],
            Arc::clone(&tail) as Arc<dyn Endpoint>,
        );
        let conn = chain
            .request(
                ConnectionRequest::new(Connection::new("c1")),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let prefs = tail.last_preferences();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].mechanism_type, MechanismType::Kernel);
        assert_eq!(prefs[0].cls, MechanismClass::Local);
        // The tail saw an empty accumulator: the client appends on the way back.
        assert!(tail.last_config().unwrap().is_empty());
        assert_eq!(conn.mechanism_type(), Some(MechanismType::Kernel));

        let seen = capture.last().unwrap();
        let fwd = seen.config.forwarding_interfaces();
        assert_eq!(fwd.len(), 1);
        assert_eq!(fwd[0].name, "client-c1");
        assert_eq!(fwd[0].if_type, ForwardingInterfaceType::Tap);
        assert_eq!(
            seen.config.kernel_interfaces()[0].namespace.as_deref(),
            Some("/proc/7/ns/net")
        );
    }

    #[tokio::test]
    async fn test_client_close_appends_symmetric_config() {
        let capture = Capture::new();
        let chain = Chain::new(vec![capture.clone(), Arc::new(KernelClient::default())]);
        let mut conn = kernel_request("c1").connection;
        chain.close(&mut conn, CancellationToken::new()).await.unwrap();

        let seen = capture.last().unwrap();
        assert_eq!(seen.config.kernel_interfaces().len(), 2);
        assert_eq!(seen.config.forwarding_interfaces()[0].name, "client-c1");
        assert!(seen.server_kernel_interface.is_none());
    }
}
