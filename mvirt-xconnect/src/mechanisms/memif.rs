//! Memif mechanism: shared-memory packet interface between two dataplanes.
//!
//! The server end listens (master) on a socket file it allocates under its
//! base directory and advertises the socket via `socketfileURL`; the client
//! end connects (slave) to that socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::chain::{NetworkService, Next};
use crate::connection::{
    Connection, ConnectionRequest, Mechanism, MechanismClass, MechanismType, file_url, params,
};
use crate::dataplane::{CallContext, ForwardingInterface, ForwardingLink};
use crate::error::Result;

/// Socket file for connection `conn_id` under `base_dir`.
pub fn socket_path(base_dir: &Path, conn_id: &str) -> PathBuf {
    base_dir.join(format!("{conn_id}.memif.socket"))
}

/// Server side of the memif mechanism.
#[derive(Debug, Clone)]
pub struct MemifServer {
    base_dir: PathBuf,
}

impl MemifServer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn append(&self, ctx: &mut CallContext, conn: &mut Connection) -> Result<()> {
        let id = conn.id.clone();
        if let Some(mechanism) = conn.mechanism_of_mut(MechanismType::Memif) {
            let socket = socket_path(&self.base_dir, &id);
            mechanism.set_parameter(params::SOCKET_FILE_URL, file_url(&socket)?);
            debug!(conn_id = %id, socket = %socket.display(), "Appending memif master");
            ctx.config.push_forwarding_interface(ForwardingInterface::new(
                format!("server-{id}"),
                ForwardingLink::Memif {
                    master: true,
                    socket_filename: socket.display().to_string(),
                },
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkService for MemifServer {
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

/// Client side of the memif mechanism.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemifClient;

impl MemifClient {
    pub fn new() -> Self {
        Self
    }

    fn append(&self, ctx: &mut CallContext, conn: &Connection) -> Result<()> {
        if let Some(mechanism) = conn.mechanism_of(MechanismType::Memif) {
            let socket = mechanism.file_url_path(params::SOCKET_FILE_URL)?;
            debug!(conn_id = %conn.id, socket = %socket, "Appending memif slave");
            ctx.config.push_forwarding_interface(ForwardingInterface::new(
                format!("client-{}", conn.id),
                ForwardingLink::Memif {
                    master: false,
                    socket_filename: socket,
                },
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkService for MemifClient {
    async fn request(
        &self,
        ctx: &mut CallContext,
        mut request: ConnectionRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        request
            .mechanism_preferences
            .push(Mechanism::new(MechanismClass::Local, MechanismType::Memif));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::dataplane::ForwardingInterfaceType;
    use crate::error::Error;
    use crate::test_util::{Capture, SelectMechanism};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn memif_request(id: &str) -> ConnectionRequest {
        let mut conn = Connection::new(id);
        conn.mechanism = Some(Mechanism::new(MechanismClass::Local, MechanismType::Memif));
        ConnectionRequest::new(conn)
    }

    #[test]
    fn test_socket_path() {
        assert_eq!(
            socket_path(Path::new("/run/memif"), "c1"),
            PathBuf::from("/run/memif/c1.memif.socket")
        );
    }

    #[tokio::test]
    async fn test_server_allocates_socket() {
        let capture = Capture::new();
        let chain = Chain::with_tail(vec![Arc::new(MemifServer::new("/run/memif"))], capture.clone());
        let conn = chain
            .request(memif_request("c1"), CancellationToken::new())
            .await
            .unwrap();

        let mechanism = conn.mechanism.unwrap();
        assert_eq!(
            mechanism.parameter(params::SOCKET_FILE_URL),
            Some("file:///run/memif/c1.memif.socket")
        );

        let seen = capture.last().unwrap();
        assert!(seen.config.kernel_interfaces().is_empty());
        let fwd = seen.config.forwarding_interfaces();
        assert_eq!(fwd.len(), 1);
        assert_eq!(fwd[0].name, "server-c1");
        assert_eq!(fwd[0].if_type, ForwardingInterfaceType::Memif);
        assert_eq!(
            fwd[0].link,
            ForwardingLink::Memif {
                master: true,
                socket_filename: "/run/memif/c1.memif.socket".into()
            }
        );
    }

    #[tokio::test]
    async fn test_server_socket_stable_across_cycles() {
        let capture = Capture::new();
        let chain = Chain::with_tail(vec![Arc::new(MemifServer::new("/run/memif"))], capture.clone());

        let mut urls = Vec::new();
        for _ in 0..2 {
            let mut closed = memif_request("c1").connection;
            chain.close(&mut closed, CancellationToken::new()).await.unwrap();
            urls.push(closed.mechanism.as_ref().unwrap().parameters[params::SOCKET_FILE_URL].clone());

            let conn = chain
                .request(memif_request("c1"), CancellationToken::new())
                .await
                .unwrap();
            urls.push(conn.mechanism.unwrap().parameters[params::SOCKET_FILE_URL].clone());
        }
        assert!(urls.windows(2).all(|w| w[0] == w[1]));

        let sockets: Vec<_> = capture
            .all()
            .into_iter()
            .map(|seen| seen.config.forwarding_interfaces()[0].link.clone())
            .collect();
        assert_eq!(sockets.len(), 4);
        assert!(sockets.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_server_escapes_socket_url() {
        let capture = Capture::new();
        let chain = Chain::with_tail(
            vec![Arc::new(MemifServer::new("/run/my memif"))],
            capture.clone(),
        );
        let conn = chain
            .request(memif_request("c1"), CancellationToken::new())
            .await
            .unwrap();

        let mechanism = conn.mechanism.unwrap();
        assert_eq!(
            mechanism.parameter(params::SOCKET_FILE_URL),
            Some("file:///run/my%20memif/c1.memif.socket")
        );
        assert_eq!(
            mechanism.file_url_path(params::SOCKET_FILE_URL).unwrap(),
            "/run/my memif/c1.memif.socket"
        );
        assert_eq!(
            capture.last().unwrap().config.forwarding_interfaces()[0].link,
            ForwardingLink::Memif {
                master: true,
                socket_filename: "/run/my memif/c1.memif.socket".into()
            }
        );
    }

    #[tokio::test]
    async fn test_server_rejects_relative_socket_dir() {
        let capture = Capture::new();
        let chain = Chain::with_tail(vec![Arc::new(MemifServer::new("run/memif"))], capture.clone());
        let err = chain
            .request(memif_request("c1"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidMechanismParameter {
                key: params::SOCKET_FILE_URL,
                ..
            }
        ));
        assert!(capture.last().is_none());
    }

    #[tokio::test]
    async fn test_client_connects_to_advertised_socket() {
        let capture = Capture::new();
        let selected = Mechanism::new(MechanismClass::Local, MechanismType::Memif)
            .with_parameter(params::SOCKET_FILE_URL, "file:///run/memif/c1.memif.socket");
        let chain = Chain::with_tail(
            vec![capture.clone(), Arc::new(MemifClient::new())],
            Arc::new(SelectMechanism::new(selected)),
        );
        chain
            .request(
                ConnectionRequest::new(Connection::new("c1")),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let seen = capture.last().unwrap();
        assert_eq!(
            seen.config.forwarding_interfaces()[0].link,
            ForwardingLink::Memif {
                master: false,
                socket_filename: "/run/memif/c1.memif.socket".into()
            }
        );
        assert_eq!(seen.config.forwarding_interfaces()[0].name, "client-c1");
    }

    #[tokio::test]
    async fn test_client_rejects_missing_socket() {
        let chain = Chain::with_tail(
            vec![Arc::new(MemifClient::new())],
            Arc::new(SelectMechanism::new(Mechanism::new(
                MechanismClass::Local,
                MechanismType::Memif,
            ))),
        );
        let err = chain
            .request(
                ConnectionRequest::new(Connection::new("c1")),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidMechanismParameter {
                key: params::SOCKET_FILE_URL,
                ..
            }
        ));
    }
}
