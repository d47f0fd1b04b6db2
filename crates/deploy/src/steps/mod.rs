//! The orchestrator's phases.

mod ownership;
pub mod planner;
mod proxy;
pub mod upgrade;
pub mod verify;
mod wiring;

pub use ownership::TransferStep;
pub use planner::{Plan, plan};
pub use proxy::DeployStep;
pub use upgrade::UpgradeMode;
pub use wiring::WireStep;
