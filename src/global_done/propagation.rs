use super::DoneContext;
use crate::error::DoneResult;
use crate::lamellae::{CommAtomic, CommProgress, CommRdma};
use crate::layout::encode_leader;

use tracing::{debug, warn};

/// The groups a completer marked done on its way up the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    /// `(level, gidx)` of every group marked done, lowest level first
    pub completed: Vec<(usize, usize)>,
    /// the parent group still waiting on a sibling, `None` once the top is done
    pub stalled_at: Option<(usize, usize)>,
}

impl Propagation {
    pub fn reached_top(&self) -> bool {
        self.stalled_at.is_none()
    }
}

impl DoneContext {
    /// Publish this PE as leader of `(level, gidx)` and mark it done.
    fn mark_group_done(&self, level: usize, gidx: usize) -> DoneResult<()> {
        let owner = self.topology.static_group_owner_pe(level, gidx);
        self.comm.put(
            owner,
            self.layout.group_leader(level, gidx),
            encode_leader(self.my_pe),
        )?;
        self.comm.quiet();
        let prev = self
            .comm
            .atomic_compare_swap(owner, self.layout.group_done(level, gidx), 0, 1)?;
        if prev != 0 {
            warn!(
                "pe {} found group {} at level {} already marked done",
                self.my_pe, gidx, level
            );
        }
        Ok(())
    }

    /// Mark `(level, gidx)` done and climb: each completed group arrives at its
    /// parent, and only the last child to arrive keeps climbing.
    pub(crate) fn complete_and_propagate(
        &self,
        level: usize,
        gidx: usize,
    ) -> DoneResult<Propagation> {
        let mut completed = Vec::new();
        let (mut level, mut gidx) = (level, gidx);
        loop {
            self.mark_group_done(level, gidx)?;
            completed.push((level, gidx));
            let (parent_level, parent_gidx) = match self.topology.parent(level, gidx) {
                Some(parent) => parent,
                None => {
                    debug!("pe {} completed the top group", self.my_pe);
                    return Ok(Propagation {
                        completed,
                        stalled_at: None,
                    });
                }
            };
            let arrival = self
                .arrival_gate(parent_level, parent_gidx)?
                .arrive(&self.comm)?;
            self.comm.quiet();
            if !arrival.is_last_arrival {
                return Ok(Propagation {
                    completed,
                    stalled_at: Some((parent_level, parent_gidx)),
                });
            }
            debug!(
                "pe {} is the dynamic leader of group {} at level {}",
                self.my_pe, parent_gidx, parent_level
            );
            level = parent_level;
            gidx = parent_gidx;
        }
    }
}
