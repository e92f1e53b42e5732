//! Client for the dataplane configuration agent.
//!
//! The agent takes the whole accumulated configuration per call: `Update`
//! on request, `Delete` on close.

pub mod proto;

use async_trait::async_trait;
use tonic::Status;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::dataplane::DataplaneConfig;
use crate::error::Result;
use proto::{Config, ConfiguratorServiceClient, DeleteRequest, UpdateRequest};

/// Remote configuration agent.
#[async_trait]
pub trait ConfigAgent: Send + Sync {
    /// Apply `config` on top of what the agent already has.
    async fn update(&self, config: &DataplaneConfig) -> std::result::Result<(), Status>;

    /// Remove everything `config` describes.
    async fn delete(&self, config: &DataplaneConfig) -> std::result::Result<(), Status>;
}

/// `ConfigAgent` over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcConfigAgent {
    client: ConfiguratorServiceClient<Channel>,
}

impl GrpcConfigAgent {
    /// Lazily connecting client; the first call establishes the connection.
    pub fn connect_lazy(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())?.connect_lazy();
        Ok(Self::from_channel(channel))
    }

    /// Connect now, failing if the agent is unreachable.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())?
            .connect()
            .await?;
        debug!(endpoint, "Connected to dataplane agent");
        Ok(Self::from_channel(channel))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: ConfiguratorServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl ConfigAgent for GrpcConfigAgent {
    async fn update(&self, config: &DataplaneConfig) -> std::result::Result<(), Status> {
        let request = UpdateRequest {
            update: Some(Config::from(config)),
            full_resync: false,
        };
        self.client.clone().update(request).await?;
        Ok(())
    }

    async fn delete(&self, config: &DataplaneConfig) -> std::result::Result<(), Status> {
        let request = DeleteRequest {
            delete: Some(Config::from(config)),
        };
        self.client.clone().delete(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_endpoint() {
        assert!(GrpcConfigAgent::connect_lazy("not a uri\n").is_err());
    }

    #[tokio::test]
    async fn test_lazy_client_reports_unavailable_agent() {
        // Nothing listens on port 1.
        let agent = GrpcConfigAgent::connect_lazy("http://127.0.0.1:1").unwrap();
        let err = agent.update(&DataplaneConfig::new()).await.unwrap_err();
        assert_ne!(err.code(), tonic::Code::Ok);
    }
}
