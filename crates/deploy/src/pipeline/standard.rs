//! The fixed provisioning composite.

use super::chain::{End, Pipeline};
use crate::steps::{DeployStep, TransferStep, WireStep};

/// deploy -> wire -> transfer-ownership.
pub type Provision = Pipeline<DeployStep, Pipeline<WireStep, Pipeline<TransferStep, End>>>;

impl Provision {
    pub fn standard() -> Self {
        Pipeline::new(DeployStep).then(WireStep).then(TransferStep)
    }
}
