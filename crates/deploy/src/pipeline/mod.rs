//! Type-checked provisioning pipeline.
//!
//! Steps are chained in a fixed stage order: deploy -> wire -> transfer-ownership.
//! Chaining out of order does not compile:
//!
//! ```compile_fail
//! use gantry_deploy::pipeline::Pipeline;
//! use gantry_deploy::steps::{TransferStep, WireStep};
//!
//! let pipeline = Pipeline::new(TransferStep).then(WireStep);
//! ```

mod chain;
mod context;
mod runner;
mod stages;
mod standard;
mod step;

pub use chain::{End, Pipeline};
pub use context::{StepContext, StepReport};
pub use runner::RunPipeline;
pub use stages::{DeployStage, NextStage, PipelineStage, TransferStage, WireStage};
pub use standard::Provision;
pub use step::Step;
