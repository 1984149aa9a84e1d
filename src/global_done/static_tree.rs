use super::DoneContext;
use super::Termination;
use crate::backoff::DeadlockWatch;
use crate::error::DoneResult;
use crate::lamellae::{CommAtomic, CommProgress, CommRdma};
use crate::layout::encode_leader;
use crate::topology::ROOT_PE;

use tracing::{debug, trace};

impl DoneContext {
    fn leaf_members_done(&self, gidx: usize) -> DoneResult<bool> {
        let first = self.topology.static_group_owner_pe(0, gidx);
        for pe in first..first + self.topology.actual_size_of_leaf_group(gidx)? {
            if self.comm.get(pe, self.layout.local_done)? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Mark `(level, gidx)` done with its static owner as leader. True if this call set the flag.
    fn mark_owned_group_done(&self, level: usize, gidx: usize) -> DoneResult<bool> {
        let owner = self.topology.static_group_owner_pe(level, gidx);
        self.comm.put(
            owner,
            self.layout.group_leader(level, gidx),
            encode_leader(owner),
        )?;
        self.comm.quiet();
        let prev = self
            .comm
            .atomic_compare_swap(owner, self.layout.group_done(level, gidx), 0, 1)?;
        Ok(prev == 0)
    }

    /// One sweep of the static tree: the leaf group once all of its members are
    /// locally done, then every internal group this PE owns once its children are.
    /// Returns the number of flags this sweep set.
    pub(crate) fn static_sweep(&self) -> DoneResult<usize> {
        let mut marked = 0;
        let leaf = self.topology.leaf_group_index(self.my_pe);
        if !self.is_group_done(0, leaf)?
            && self.leaf_members_done(leaf)?
            && self.mark_owned_group_done(0, leaf)?
        {
            debug!("pe {} observed leaf group {} done", self.my_pe, leaf);
            marked += 1;
        }
        for level in 1..self.topology.num_levels() {
            let span = self.topology.group_span_at_level(level);
            if self.my_pe % span != 0 {
                break;
            }
            let gidx = self.my_pe / span;
            if self.is_group_done(level, gidx)? {
                continue;
            }
            let first = 2 * gidx;
            let mut children_done = true;
            for child in first..first + self.topology.expected_children(level, gidx)? {
                if !self.is_group_done(level - 1, child)? {
                    children_done = false;
                    break;
                }
            }
            if children_done && self.mark_owned_group_done(level, gidx)? {
                debug!(
                    "pe {} (owner of group {} at level {}) set its group done",
                    self.my_pe, gidx, level
                );
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Sweep until the top group is done, then leave through the same exit as the dynamic tree
    pub(crate) fn drive_static(&self) -> DoneResult<Termination> {
        let mut backoff = self.backoff.start();
        let mut watch =
            DeadlockWatch::new(self.deadlock_timeout, "waiting for global completion");
        loop {
            if self.is_globally_done()? {
                trace!("pe {} observed global completion", self.my_pe);
                return if self.my_pe == ROOT_PE {
                    self.root_exit(backoff.polls())
                } else {
                    self.non_root_exit(backoff.polls())
                };
            }
            if self.static_sweep()? > 0 {
                backoff.reset();
            }
            backoff.pause();
            watch.check(self.my_pe);
        }
    }
}
