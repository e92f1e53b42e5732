//! Per-mechanism interface builders.
//!
//! Each mechanism has a client stage (advertises a preference, then appends
//! its interface once the peer has settled the mechanism) and a server stage
//! (appends its interface, then delegates). Interfaces are named
//! `client-<id>` and `server-<id>` so both ends of one connection can share a
//! dataplane.

pub mod kernel;
pub mod memif;
pub mod vxlan;

pub use kernel::{KernelClient, KernelServer, KernelTemplate};
pub use memif::{MemifClient, MemifServer};
pub use vxlan::{VxlanClient, VxlanServer};
