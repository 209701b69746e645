//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Membership (joined storage workers and their placement load)
//! - Placement decisions (least-loaded workers, registration-order ties)
//! - Store/remove quorum tracking with deadlines
//! - Load failover across replicas

pub mod engine;
pub mod index;
pub mod load;
pub mod membership;
pub mod server;
pub mod service;
pub mod session;

pub use server::Coordinator;
pub use service::CoordinatorHandle;
