//! Per-call dataplane configuration accumulator.
//!
//! `DataplaneConfig` holds the kernel-visible interfaces and the dataplane
//! (forwarding) side: interfaces, L3 cross-connects and proxy-ARP. Stages only
//! append; the single in-place mutation allowed is patching the most recently
//! appended forwarding interface.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Kernel-visible interface kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelInterfaceType {
    Veth,
    TapToDataplane,
}

/// Type-specific link of a kernel interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelLink {
    Veth {
        peer_if_name: String,
        /// Checksum offloading is always disabled on veth pairs bridged into
        /// the dataplane.
        checksum_offload: bool,
    },
    Tap {
        dataplane_tap_if_name: String,
    },
}

/// A kernel-visible interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelInterface {
    pub name: String,
    pub if_type: KernelInterfaceType,
    pub enabled: bool,
    /// Name seen by the kernel, at most 15 characters.
    pub host_if_name: String,
    /// Network namespace file, `None` for the root namespace.
    pub namespace: Option<String>,
    pub link: KernelLink,
}

/// Dataplane interface kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardingInterfaceType {
    AfPacket,
    Tap,
    Memif,
    Vxlan,
}

/// Type-specific link of a dataplane interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardingLink {
    AfPacket {
        host_if_name: String,
    },
    Tap {
        version: u32,
    },
    Memif {
        master: bool,
        socket_filename: String,
    },
    Vxlan {
        src_address: String,
        dst_address: String,
        vni: u32,
    },
}

/// A dataplane interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardingInterface {
    pub name: String,
    pub if_type: ForwardingInterfaceType,
    pub enabled: bool,
    pub ip_addresses: Vec<String>,
    pub link: ForwardingLink,
}

impl ForwardingInterface {
    /// Enabled interface without addresses; the type follows from the link.
    pub fn new(name: impl Into<String>, link: ForwardingLink) -> Self {
        let if_type = match link {
            ForwardingLink::AfPacket { .. } => ForwardingInterfaceType::AfPacket,
            ForwardingLink::Tap { .. } => ForwardingInterfaceType::Tap,
            ForwardingLink::Memif { .. } => ForwardingInterfaceType::Memif,
            ForwardingLink::Vxlan { .. } => ForwardingInterfaceType::Vxlan,
        };
        Self {
            name: name.into(),
            if_type,
            enabled: true,
            ip_addresses: Vec::new(),
            link,
        }
    }
}

/// One forwarding path of a cross-connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossConnectPath {
    pub outgoing_interface: String,
    pub next_hop_addr: Option<String>,
}

/// Static L3 forwarding from `interface` over `paths`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossConnect {
    pub interface: String,
    pub paths: Vec<CrossConnectPath>,
}

/// Inclusive address range answered by proxy-ARP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyArpRange {
    pub first_ip_addr: String,
    pub last_ip_addr: String,
}

impl ProxyArpRange {
    /// Range covering a single address.
    pub fn single(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        Self {
            first_ip_addr: addr.clone(),
            last_ip_addr: addr,
        }
    }
}

/// Proxy-ARP settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProxyArp {
    pub interfaces: Vec<String>,
    pub ranges: Vec<ProxyArpRange>,
}

/// Configuration accumulated over one request or close invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DataplaneConfig {
    kernel_interfaces: Vec<KernelInterface>,
    forwarding_interfaces: Vec<ForwardingInterface>,
    cross_connects: Vec<CrossConnect>,
    proxy_arp: Option<ProxyArp>,
}

impl DataplaneConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kernel_interfaces(&self) -> &[KernelInterface] {
        &self.kernel_interfaces
    }

    pub fn forwarding_interfaces(&self) -> &[ForwardingInterface] {
        &self.forwarding_interfaces
    }

    pub fn cross_connects(&self) -> &[CrossConnect] {
        &self.cross_connects
    }

    pub fn proxy_arp(&self) -> Option<&ProxyArp> {
        self.proxy_arp.as_ref()
    }

    pub fn push_kernel_interface(&mut self, iface: KernelInterface) {
        self.kernel_interfaces.push(iface);
    }

    pub fn push_forwarding_interface(&mut self, iface: ForwardingInterface) {
        self.forwarding_interfaces.push(iface);
    }

    pub fn push_cross_connect(&mut self, xconnect: CrossConnect) {
        self.cross_connects.push(xconnect);
    }

    /// Proxy-ARP block, created on first use.
    pub fn proxy_arp_mut(&mut self) -> &mut ProxyArp {
        self.proxy_arp.get_or_insert_with(ProxyArp::default)
    }

    pub fn last_kernel_interface(&self) -> Option<&KernelInterface> {
        self.kernel_interfaces.last()
    }

    /// The most recently appended forwarding interface, for in-place patching.
    pub fn last_forwarding_interface_mut(&mut self) -> Option<&mut ForwardingInterface> {
        self.forwarding_interfaces.last_mut()
    }

    /// The two most recently appended forwarding interfaces, oldest first.
    pub fn last_two_forwarding_interfaces(
        &self,
    ) -> Option<(&ForwardingInterface, &ForwardingInterface)> {
        match self.forwarding_interfaces.as_slice() {
            [.., a, b] => Some((a, b)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kernel_interfaces.is_empty()
            && self.forwarding_interfaces.is_empty()
            && self.cross_connects.is_empty()
            && self.proxy_arp.is_none()
    }

    /// JSON rendering used in error reports.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable config: {e}>"))
    }
}

/// State owned by a single request or close invocation.
///
/// Created fresh by the chain for every call and dropped when the call
/// returns.
#[derive(Debug, Default)]
pub struct CallContext {
    /// The accumulator stages append to.
    pub config: DataplaneConfig,
    /// Kernel interface created by the server-side kernel stage.
    pub server_kernel_interface: Option<KernelInterface>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            config: DataplaneConfig::new(),
            server_kernel_interface: None,
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
