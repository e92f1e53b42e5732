//! Connection descriptors as handed to the stages.
//!
//! A `Connection` carries the negotiated `Mechanism`, whose string parameters
//! are read and written by the mechanism builders (namespace URL, memif socket
//! URL, vxlan addresses and VNI).

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Linux limit for interface names (IFNAMSIZ - 1).
pub const LINUX_IF_MAX_LENGTH: usize = 15;

/// Scheme accepted for namespace and socket URLs.
pub const FILE_SCHEME: &str = "file";

/// Mechanism parameter keys.
pub mod params {
    /// Network namespace of the kernel interface (`file://` URL).
    pub const NETNS_URL: &str = "netnsURL";
    /// Requested kernel interface name.
    pub const INTERFACE_NAME: &str = "name";
    /// Memif socket file (`file://` URL), written by the server.
    pub const SOCKET_FILE_URL: &str = "socketfileURL";
    /// Vxlan source address, relative to the client.
    pub const SRC_IP: &str = "src_ip";
    /// Vxlan destination address, relative to the client.
    pub const DST_IP: &str = "dst_ip";
    /// Vxlan network identifier.
    pub const VNI: &str = "vni";
}

/// Whether a mechanism is local to the host or crosses the underlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MechanismClass {
    #[default]
    Local,
    Remote,
}

/// Mechanism type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MechanismType {
    Kernel,
    Memif,
    Vxlan,
    /// Any mechanism no stage in this crate understands.
    #[default]
    #[serde(other)]
    Unsupported,
}

impl MechanismType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MechanismType::Kernel => "KERNEL",
            MechanismType::Memif => "MEMIF",
            MechanismType::Vxlan => "VXLAN",
            MechanismType::Unsupported => "UNSUPPORTED",
        }
    }
}

/// Negotiated transport binding for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mechanism {
    pub cls: MechanismClass,
    #[serde(rename = "type")]
    pub mechanism_type: MechanismType,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl Mechanism {
    pub fn new(cls: MechanismClass, mechanism_type: MechanismType) -> Self {
        Self {
            cls,
            mechanism_type,
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Parameter value, treating an empty string as absent.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set_parameter(&mut self, key: &str, value: impl Into<String>) {
        self.parameters.insert(key.to_string(), value.into());
    }

    pub fn is(&self, mechanism_type: MechanismType) -> bool {
        self.mechanism_type == mechanism_type
    }

    /// Kernel interface name inside the target namespace.
    ///
    /// Uses the `name` parameter if present, otherwise derives one from the
    /// network service and connection id.
    pub fn interface_name(&self, conn: &Connection) -> String {
        if let Some(name) = self.parameter(params::INTERFACE_NAME) {
            return name.to_string();
        }
        let ns_max = LINUX_IF_MAX_LENGTH - 5;
        let ns = truncate(&conn.network_service, ns_max);
        let name = if ns.is_empty() {
            conn.id.clone()
        } else {
            format!("{}-{}", ns, conn.id)
        };
        truncate(&name, LINUX_IF_MAX_LENGTH).to_string()
    }

    /// Path component of a `file://` URL parameter.
    pub fn file_url_path(&self, key: &'static str) -> Result<String> {
        let value = self.parameter(key).unwrap_or_default();
        parse_file_url(value).map_err(|reason| Error::invalid_param(key, value, reason))
    }

    /// IP address parameter.
    pub fn ip_parameter(&self, key: &'static str) -> Result<IpAddr> {
        let value = self.parameter(key).unwrap_or_default();
        value
            .parse::<IpAddr>()
            .map_err(|e| Error::invalid_param(key, value, e.to_string()))
    }

    /// Vxlan network identifier.
    pub fn vni(&self) -> Result<u32> {
        let value = self.parameter(params::VNI).unwrap_or_default();
        value
            .parse::<u32>()
            .map_err(|e| Error::invalid_param(params::VNI, value, e.to_string()))
    }
}

/// Payload carried by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Payload {
    Ip,
    Ethernet,
}

/// Addresses assigned to the two ends of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpContext {
    pub src_ip_addr: String,
    pub dst_ip_addr: String,
}

impl IpContext {
    pub fn is_empty(&self) -> bool {
        self.src_ip_addr.is_empty() && self.dst_ip_addr.is_empty()
    }

    /// Source address as assigned, prefix length included.
    pub fn src_addr(&self) -> Option<&str> {
        non_empty(&self.src_ip_addr)
    }

    /// Destination address as assigned, prefix length included.
    pub fn dst_addr(&self) -> Option<&str> {
        non_empty(&self.dst_ip_addr)
    }
}

/// A point-to-point connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub id: String,
    pub network_service: String,
    pub mechanism: Option<Mechanism>,
    pub payload: Option<Payload>,
    pub ip_context: IpContext,
}

impl Connection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// The negotiated mechanism, if it is of the given type.
    pub fn mechanism_of(&self, mechanism_type: MechanismType) -> Option<&Mechanism> {
        self.mechanism.as_ref().filter(|m| m.is(mechanism_type))
    }

    pub fn mechanism_of_mut(&mut self, mechanism_type: MechanismType) -> Option<&mut Mechanism> {
        self.mechanism.as_mut().filter(|m| m.is(mechanism_type))
    }

    pub fn mechanism_type(&self) -> Option<MechanismType> {
        self.mechanism.as_ref().map(|m| m.mechanism_type)
    }

    /// IP payload, or no payload set.
    pub fn is_ip_payload(&self) -> bool {
        matches!(self.payload, None | Some(Payload::Ip))
    }
}

/// A request for a connection, with the mechanisms the requester accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionRequest {
    pub connection: Connection,
    pub mechanism_preferences: Vec<Mechanism>,
}

impl ConnectionRequest {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            mechanism_preferences: Vec::new(),
        }
    }
}

/// Truncate to at most `max` bytes on a char boundary.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Host-visible interface name, limited to 15 characters.
pub fn linux_if_name(name: &str) -> String {
    truncate(name, LINUX_IF_MAX_LENGTH).to_string()
}

fn parse_file_url(value: &str) -> std::result::Result<String, String> {
    let url = Url::parse(value).map_err(|e| e.to_string())?;
    if url.scheme() != FILE_SCHEME {
        return Err(format!(
            "must be of scheme {FILE_SCHEME:?}, got {:?}",
            url.scheme()
        ));
    }
    if matches!(url.path(), "" | "/") {
        return Err("empty path".to_string());
    }
    let path = url
        .to_file_path()
        .map_err(|()| "not a local file path".to_string())?;
    path.into_os_string()
        .into_string()
        .map_err(|_| "path is not valid UTF-8".to_string())
}

/// `file://` URL for an absolute local path.
pub fn file_url(path: &Path) -> Result<String> {
    Url::from_file_path(path)
        .map(String::from)
        .map_err(|()| {
            Error::invalid_param(
                params::SOCKET_FILE_URL,
                path.display().to_string(),
                "not an absolute path",
            )
        })
}

fn non_empty(addr: &str) -> Option<&str> {
    (!addr.is_empty()).then_some(addr)
}
