//! Session and test orchestration.
//!
//! Covers device reservation, session launch and shutdown, per-tick
//! supervision of running roles, and post-mortem classification.

pub mod artifact_paths;
pub mod classify;
pub mod executor;
pub mod heartbeat;
pub mod instance;
pub mod output_cursor;
pub mod reservation;
pub mod screenshots;
pub mod session;
pub mod test_node;

pub use artifact_paths::ArtifactPathRegistry;
pub use executor::{Executor, RunSummary};
pub use instance::{RoleInstance, SessionInstance};
pub use reservation::DeviceReservation;
pub use session::{Session, SessionOptions};
pub use test_node::{TestContext, TestNode, TestStatus};
