pub mod agent;
pub mod chain;
pub mod commit;
pub mod config;
pub mod connection;
pub mod dataplane;
pub mod error;
pub mod ipaddress;
pub mod mechanisms;
pub mod pipeline;
pub mod test_util;
pub mod xconnect;

pub use chain::{Chain, Endpoint, NetworkService, Next, Terminal};
pub use commit::{CommitClient, RetryPolicy};
pub use config::XconnectConfig;
pub use connection::{Connection, ConnectionRequest, Mechanism, MechanismClass, MechanismType};
pub use dataplane::{CallContext, DataplaneConfig};
pub use error::{Error, Result};
pub use pipeline::{ChainBuilder, Role};

// Re-export tonic for external tests that need matching versions
pub use tonic;
