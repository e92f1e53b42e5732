//! Generated protobuf types of the dataplane agent's configurator service,
//! and their construction from the accumulator.

#![allow(clippy::enum_variant_names)]

pub mod ligato {
    pub mod configurator {
        tonic::include_proto!("ligato.configurator");
    }

    pub mod vpp {
        tonic::include_proto!("ligato.vpp");

        pub mod interfaces {
            tonic::include_proto!("ligato.vpp.interfaces");
        }

        pub mod l3 {
            tonic::include_proto!("ligato.vpp.l3");
        }
    }

    pub mod linux {
        tonic::include_proto!("ligato.linux");

        pub mod interfaces {
            tonic::include_proto!("ligato.linux.interfaces");
        }

        pub mod namespace {
            tonic::include_proto!("ligato.linux.namespace");
        }
    }
}

pub use ligato::configurator::configurator_service_client::ConfiguratorServiceClient;
pub use ligato::configurator::{Config, DeleteRequest, UpdateRequest};

use ligato::linux::interfaces as linux_if;
use ligato::linux::namespace::{NetNamespace, net_namespace};
use ligato::vpp::interfaces as vpp_if;
use ligato::vpp::l3;

use crate::dataplane::{
    CrossConnect, DataplaneConfig, ForwardingInterface, ForwardingLink, KernelInterface,
    KernelInterfaceType, KernelLink, ProxyArp,
};

fn vpp_interface(iface: &ForwardingInterface) -> vpp_if::Interface {
    use vpp_if::interface::{Link, Type};

    let (if_type, link) = match &iface.link {
        ForwardingLink::AfPacket { host_if_name } => (
            Type::AfPacket,
            Link::Afpacket(vpp_if::AfpacketLink {
                host_if_name: host_if_name.clone(),
            }),
        ),
        ForwardingLink::Tap { version } => {
            (Type::Tap, Link::Tap(vpp_if::TapLink { version: *version }))
        }
        ForwardingLink::Memif {
            master,
            socket_filename,
        } => (
            Type::Memif,
            Link::Memif(vpp_if::MemifLink {
                master: *master,
                socket_filename: socket_filename.clone(),
            }),
        ),
        ForwardingLink::Vxlan {
            src_address,
            dst_address,
            vni,
        } => (
            Type::VxlanTunnel,
            Link::Vxlan(vpp_if::VxlanLink {
                src_address: src_address.clone(),
                dst_address: dst_address.clone(),
                vni: *vni,
            }),
        ),
    };
    vpp_if::Interface {
        name: iface.name.clone(),
        r#type: if_type as i32,
        enabled: iface.enabled,
        ip_addresses: iface.ip_addresses.clone(),
        link: Some(link),
    }
}

fn linux_interface(iface: &KernelInterface) -> linux_if::Interface {
    use linux_if::interface::{Link, Type};
    use linux_if::veth_link::ChecksumOffloading;

    let if_type = match iface.if_type {
        KernelInterfaceType::Veth => Type::Veth,
        KernelInterfaceType::TapToDataplane => Type::TapToVpp,
    };
    let link = match &iface.link {
        KernelLink::Veth {
            peer_if_name,
            checksum_offload,
        } => {
            let offload = if *checksum_offload {
                ChecksumOffloading::ChksmOffloadEnabled
            } else {
                ChecksumOffloading::ChksmOffloadDisabled
            };
            Link::Veth(linux_if::VethLink {
                peer_if_name: peer_if_name.clone(),
                rx_checksum_offloading: offload as i32,
                tx_checksum_offloading: offload as i32,
            })
        }
        KernelLink::Tap {
            dataplane_tap_if_name,
        } => Link::Tap(linux_if::TapLink {
            vpp_tap_if_name: dataplane_tap_if_name.clone(),
        }),
    };
    linux_if::Interface {
        name: iface.name.clone(),
        r#type: if_type as i32,
        namespace: iface.namespace.as_ref().map(|reference| NetNamespace {
            r#type: net_namespace::ReferenceType::Fd as i32,
            reference: reference.clone(),
        }),
        host_if_name: iface.host_if_name.clone(),
        enabled: iface.enabled,
        link: Some(link),
    }
}

fn l3_xconnect(xc: &CrossConnect) -> l3::L3xConnect {
    l3::L3xConnect {
        interface: xc.interface.clone(),
        protocol: l3::l3x_connect::Protocol::Ipv4 as i32,
        paths: xc
            .paths
            .iter()
            .map(|p| l3::l3x_connect::Path {
                outgoing_interface: p.outgoing_interface.clone(),
                next_hop_addr: p.next_hop_addr.clone().unwrap_or_default(),
            })
            .collect(),
    }
}

fn proxy_arp(arp: &ProxyArp) -> l3::ProxyArp {
    l3::ProxyArp {
        interfaces: arp
            .interfaces
            .iter()
            .map(|name| l3::proxy_arp::Interface { name: name.clone() })
            .collect(),
        ranges: arp
            .ranges
            .iter()
            .map(|r| l3::proxy_arp::Range {
                first_ip_addr: r.first_ip_addr.clone(),
                last_ip_addr: r.last_ip_addr.clone(),
            })
            .collect(),
    }
}

impl From<&DataplaneConfig> for Config {
    fn from(config: &DataplaneConfig) -> Self {
        Config {
            vpp_config: Some(ligato::vpp::ConfigData {
                interfaces: config
                    .forwarding_interfaces()
                    .iter()
                    .map(vpp_interface)
                    .collect(),
                proxy_arp: config.proxy_arp().map(proxy_arp),
                l3xconnects: config.cross_connects().iter().map(l3_xconnect).collect(),
            }),
            linux_config: Some(ligato::linux::ConfigData {
                interfaces: config
                    .kernel_interfaces()
                    .iter()
                    .map(linux_interface)
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::{CrossConnectPath, ProxyArpRange};
    use prost::Message;

    fn sample() -> DataplaneConfig {
        let mut config = DataplaneConfig::new();
        config.push_kernel_interface(KernelInterface {
            name: "server-c1".into(),
            if_type: KernelInterfaceType::Veth,
            enabled: true,
            host_if_name: "nsm-1".into(),
            namespace: Some("/proc/42/ns/net".into()),
            link: KernelLink::Veth {
                peer_if_name: "server-c1-veth".into(),
                checksum_offload: false,
            },
        });
        config.push_forwarding_interface(ForwardingInterface::new(
            "server-c1",
            ForwardingLink::AfPacket {
                host_if_name: "server-c1".into(),
            },
        ));
        config.push_forwarding_interface(ForwardingInterface::new(
            "client-c1",
            ForwardingLink::Vxlan {
                src_address: "1.1.1.1".into(),
                dst_address: "1.1.1.2".into(),
                vni: 9,
            },
        ));
        config.push_forwarding_interface(ForwardingInterface::new(
            "client-c2",
            ForwardingLink::Memif {
                master: false,
                socket_filename: "/run/memif/c2.memif.socket".into(),
            },
        ));
        config.push_cross_connect(CrossConnect {
            interface: "server-c1".into(),
            paths: vec![CrossConnectPath {
                outgoing_interface: "client-c1".into(),
                next_hop_addr: None,
            }],
        });
        config.proxy_arp_mut().ranges.push(ProxyArpRange::single("10.0.0.1/32"));
        config
    }

    #[test]
    fn test_config_conversion() {
        let wire = Config::from(&sample());
        let vpp = wire.vpp_config.unwrap();
        assert_eq!(vpp.interfaces.len(), 3);
        assert_eq!(
            vpp.interfaces[1].link,
            Some(vpp_if::interface::Link::Vxlan(vpp_if::VxlanLink {
                src_address: "1.1.1.1".into(),
                dst_address: "1.1.1.2".into(),
                vni: 9,
            }))
        );
        assert_eq!(vpp.l3xconnects[0].paths[0].next_hop_addr, "");
        assert_eq!(vpp.proxy_arp.unwrap().ranges[0].last_ip_addr, "10.0.0.1/32");

        let linux = wire.linux_config.unwrap();
        let ns = linux.interfaces[0].namespace.as_ref().unwrap();
        assert_eq!(ns.r#type, net_namespace::ReferenceType::Fd as i32);
        assert_eq!(ns.reference, "/proc/42/ns/net");
        match &linux.interfaces[0].link {
            Some(linux_if::interface::Link::Veth(veth)) => {
                assert_eq!(
                    veth.rx_checksum_offloading,
                    linux_if::veth_link::ChecksumOffloading::ChksmOffloadDisabled as i32
                );
            }
            other => panic!("unexpected link {other:?}"),
        }
    }

    #[test]
    fn test_interface_type_numbers() {
        // The agent decodes interface types by number.
        let vpp = Config::from(&sample()).vpp_config.unwrap();
        let types: Vec<i32> = vpp.interfaces.iter().map(|i| i.r#type).collect();
        assert_eq!(types, [6, 7, 4]);
        assert_eq!(vpp.interfaces[0].r#type(), vpp_if::interface::Type::AfPacket);
        assert_eq!(vpp.interfaces[2].r#type(), vpp_if::interface::Type::Memif);

        let mut tap = DataplaneConfig::new();
        tap.push_forwarding_interface(ForwardingInterface::new(
            "server-c1",
            ForwardingLink::Tap { version: 2 },
        ));
        let vpp = Config::from(&tap).vpp_config.unwrap();
        assert_eq!(vpp.interfaces[0].r#type, 5);

        let linux = Config::from(&sample()).linux_config.unwrap();
        assert_eq!(linux.interfaces[0].r#type, 1);
    }

    #[test]
    fn test_update_request_encodes() {
        let request = UpdateRequest {
            update: Some(Config::from(&sample())),
            full_resync: false,
        };
        let bytes = request.encode_to_vec();
        let decoded = UpdateRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_empty_config_has_no_proxy_arp() {
        let wire = Config::from(&DataplaneConfig::new());
        assert!(wire.vpp_config.unwrap().proxy_arp.is_none());
    }
}
