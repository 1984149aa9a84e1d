use super::{DoneContext, Propagation};
use crate::error::DoneResult;
use crate::lamellae::CommProgress;

use std::sync::atomic::Ordering;
use tracing::debug;

/// What a single attempt at the leaf group achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafOutcome {
    /// the leaf group was already complete, nothing was written
    AlreadyDone,
    /// this PE was counted into its leaf group but was not the last arrival
    Arrived,
    /// this PE arrived earlier and the group is still waiting on others
    Waiting,
    /// this PE completed the leaf group and carried completion upward
    Propagated(Propagation),
}

impl DoneContext {
    /// Count this PE into its leaf group, completing the group if it is the last arrival.
    ///
    /// Repeated calls are safe: a PE is counted at most once.
    pub(crate) fn try_complete_leaf(&self) -> DoneResult<LeafOutcome> {
        let gidx = self.topology.leaf_group_index(self.my_pe);
        if self.is_group_done(0, gidx)? {
            return Ok(LeafOutcome::AlreadyDone);
        }
        if self.arrived.swap(true, Ordering::SeqCst) {
            return Ok(LeafOutcome::Waiting);
        }
        let arrival = self.arrival_gate(0, gidx)?.arrive(&self.comm)?;
        self.comm.quiet();
        if !arrival.is_last_arrival {
            return Ok(LeafOutcome::Arrived);
        }
        debug!(
            "pe {} is the dynamic leader of leaf group {} after {} prior arrivals",
            self.my_pe, gidx, arrival.prior
        );
        Ok(LeafOutcome::Propagated(
            self.complete_and_propagate(0, gidx)?,
        ))
    }
}
