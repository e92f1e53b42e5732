//! Process configuration, read from a JSON file.
//!
//! Every field has a default, so an empty object (or no file at all) is a
//! valid configuration.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commit::RetryPolicy;
use crate::error::{Error, Result};
use crate::mechanisms::kernel::VHOST_NET_DEVICE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct XconnectConfig {
    /// Dataplane agent gRPC endpoint.
    pub agent_endpoint: String,
    /// Directory for memif socket files.
    pub memif_socket_dir: PathBuf,
    /// Local underlay address for vxlan tunnels. Without one, vxlan stages are
    /// left out of the chain.
    pub vxlan_local_ip: Option<IpAddr>,
    /// Device whose presence selects the tap fast path for kernel interfaces.
    pub fast_path_device: PathBuf,
    pub commit_retry: RetryConfig,
}

impl Default for XconnectConfig {
    fn default() -> Self {
        Self {
            agent_endpoint: "http://[::1]:9111".to_string(),
            memif_socket_dir: PathBuf::from("/run/mvirt/xconnect/memif"),
            vxlan_local_ip: None,
            fast_path_device: PathBuf::from(VHOST_NET_DEVICE),
            commit_retry: RetryConfig::default(),
        }
    }
}

impl XconnectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        Self::parse(&data).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn parse(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data).map_err(|e| Error::Config(e.to_string()))?;
        if !config.memif_socket_dir.is_absolute() {
            return Err(Error::Config(format!(
                "memifSocketDir must be an absolute path, got {}",
                config.memif_socket_dir.display()
            )));
        }
        config.commit_retry.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    #[default]
    Bounded,
    /// Retry until the call is cancelled, without delay.
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub mode: RetryMode,
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            mode: RetryMode::Bounded,
            max_attempts: 50,
            delay_ms: 100,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if self.mode == RetryMode::Bounded && self.max_attempts == 0 {
            return Err(Error::Config(
                "commitRetry.maxAttempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        match self.mode {
            RetryMode::Unbounded => RetryPolicy::Unbounded,
            RetryMode::Bounded => RetryPolicy::Bounded {
                max_attempts: self.max_attempts,
                delay: Duration::from_millis(self.delay_ms),
            },
        }
    }
}
