//! The termination protocol.
//!
//! Every PE runs the same polling loop: check whether the top group is done,
//! otherwise make (at most one) arrival at its leaf group, then pause. The last
//! PE to arrive at a leaf completes it and carries completion upward, merging
//! with sibling groups through their arrival counters. Once the top group is
//! done, the root aggregates the recorded timings and releases everyone.
//!
//! The [`Strategy`] enum selects between this dynamic tree and the simpler
//! detectors it grew out of: a static tree polled by fixed owners, a flat star
//! and a multi-level star.

mod leaf;
mod propagation;
mod root;
mod star;
mod static_tree;

pub use leaf::LeafOutcome;
pub use propagation::Propagation;
pub use root::{Role, Termination};

use crate::arrival_gate::AtomicArrivalGate;
use crate::backoff::{Backoff, DeadlockWatch};
use crate::barrier::Barrier;
use crate::config;
use crate::error::DoneResult;
use crate::lamellae::{Comm, CommAtomic, CommRdma};
use crate::layout::{decode_leader, DoneLayout};
use crate::topology::{StarTopology, TreeTopology, ROOT_PE};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::trace;

/// How completion is detected and announced
#[derive(
    serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy,
)]
pub enum Strategy {
    /// last arrivals elected by atomic counters carry completion up a binary merge tree
    DynamicTree,
    /// fixed group owners poll their members and child groups up a binary tree
    StaticTree,
    /// leaf anchors collect member flags, the root collects anchors and releases every PE directly
    Star,
    /// a `K`-ary star of stars, released by a token broadcast back down the same tree
    HStar,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Strategy> {
        match name {
            "tree" | "dynamic_tree" => Some(Strategy::DynamicTree),
            "static_tree" => Some(Strategy::StaticTree),
            "star" => Some(Strategy::Star),
            "hstar" => Some(Strategy::HStar),
            _ => None,
        }
    }

    /// The binary group tree strategies share the done/leader/arrival flags and the ack exit
    pub fn uses_group_tree(&self) -> bool {
        matches!(self, Strategy::DynamicTree | Strategy::StaticTree)
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::from_name(config().strategy.as_str()).unwrap_or(Strategy::DynamicTree)
    }
}

/// Everything one PE needs to take part in the protocol
#[derive(Debug)]
pub(crate) struct DoneContext {
    pub(crate) my_pe: usize,
    pub(crate) comm: Arc<Comm>,
    pub(crate) strategy: Strategy,
    pub(crate) topology: TreeTopology,
    /// the fan-in tree, present for the star strategies
    pub(crate) star: Option<StarTopology>,
    pub(crate) layout: DoneLayout,
    pub(crate) backoff: Backoff,
    pub(crate) deadlock_timeout: f64,
    /// set once this PE has counted itself into its leaf group
    arrived: AtomicBool,
}

impl DoneContext {
    pub(crate) fn new(
        comm: Arc<Comm>,
        my_pe: usize,
        strategy: Strategy,
        topology: TreeTopology,
        star: Option<StarTopology>,
        layout: DoneLayout,
        backoff: Backoff,
        deadlock_timeout: f64,
    ) -> DoneContext {
        DoneContext {
            my_pe,
            comm,
            strategy,
            topology,
            star,
            layout,
            backoff,
            deadlock_timeout,
            arrived: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_group_done(&self, level: usize, gidx: usize) -> DoneResult<bool> {
        self.topology.check_group(level, gidx)?;
        let owner = self.topology.static_group_owner_pe(level, gidx);
        Ok(self.comm.get(owner, self.layout.group_done(level, gidx))? != 0)
    }

    pub(crate) fn group_leader(&self, level: usize, gidx: usize) -> DoneResult<Option<usize>> {
        self.topology.check_group(level, gidx)?;
        let owner = self.topology.static_group_owner_pe(level, gidx);
        Ok(decode_leader(
            self.comm.get(owner, self.layout.group_leader(level, gidx))?,
        ))
    }

    /// Global completion is the done flag of the single top group, hosted on the root.
    /// The star strategies use the root's release token instead.
    pub(crate) fn is_globally_done(&self) -> DoneResult<bool> {
        if self.strategy.uses_group_tree() {
            self.is_group_done(self.topology.top_level(), 0)
        } else {
            self.star_released()
        }
    }

    pub(crate) fn arrival_gate(&self, level: usize, gidx: usize) -> DoneResult<AtomicArrivalGate> {
        Ok(AtomicArrivalGate::new(
            self.topology.static_group_owner_pe(level, gidx),
            self.layout.group_arrivals(level, gidx),
            self.topology.expected_arrivals(level, gidx)?,
        ))
    }

    /// Claim the one-time aggregate report. True for exactly one caller job-wide.
    pub(crate) fn claim_report(&self) -> DoneResult<bool> {
        Ok(self
            .comm
            .atomic_compare_swap(ROOT_PE, self.layout.agg_printed, 0, 1)?
            == 0)
    }

    /// Run this PE's part of the selected strategy until its collective exit
    #[tracing::instrument(skip_all)]
    pub(crate) fn drive(&self, barrier: &Barrier) -> DoneResult<Termination> {
        match self.strategy {
            Strategy::DynamicTree => self.drive_dynamic(),
            Strategy::StaticTree => self.drive_static(),
            Strategy::Star | Strategy::HStar => self.drive_star(barrier),
        }
    }

    /// Poll until the top group completes, then run the exit sequence for this PE's role
    fn drive_dynamic(&self) -> DoneResult<Termination> {
        let mut backoff = self.backoff.start();
        let mut watch = DeadlockWatch::new(self.deadlock_timeout, "waiting for global completion");
        loop {
            if self.is_globally_done()? {
                trace!("pe {} observed global completion", self.my_pe);
                return if self.my_pe == ROOT_PE {
                    self.root_exit(backoff.polls())
                } else {
                    self.non_root_exit(backoff.polls())
                };
            }
            match self.try_complete_leaf()? {
                LeafOutcome::Arrived | LeafOutcome::Propagated(_) => backoff.reset(),
                LeafOutcome::AlreadyDone | LeafOutcome::Waiting => {}
            }
            backoff.pause();
            watch.check(self.my_pe);
        }
    }
}
