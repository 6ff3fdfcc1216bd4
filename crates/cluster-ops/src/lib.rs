//! Typed wrappers around the external tools that provision a hybrid cluster.
//!
//! Each module runs one kind of tool through a [`CommandRunner`] and turns
//! exit codes and output into typed results. Nothing here sequences work;
//! that is the installer's job.
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_ops::{Kubectl, SystemRunner};
//!
//! let runner = SystemRunner;
//! let kubectl = Kubectl::new(&runner, None);
//! for node in kubectl.nodes()? {
//!     println!("{} ready={}", node.name, node.ready);
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ansible;
pub mod command;
pub mod helmfile;
pub mod kubectl;
pub mod mesh;
pub mod net;
pub mod sops;
pub mod tunnel;

pub use command::{run_checked, CommandRunner, Invocation, SystemRunner, ToolError, ToolOutput};
pub use helmfile::{DiffStatus, Helmfile};
pub use kubectl::{Kubectl, NodeStatus, PodStatus, ReplicaCount};
pub use mesh::{MeshPeer, MeshStatus};
pub use tunnel::{DnsRouting, LogScrapeTunnelStatus, TunnelStatus, TunnelStatusSource};

#[cfg(any(test, feature = "mock"))]
pub use command::MockCommandRunner;
#[cfg(any(test, feature = "mock"))]
pub use tunnel::MockTunnelStatusSource;
