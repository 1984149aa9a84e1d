use super::DoneContext;
use crate::backoff::{spin_until, DeadlockWatch};
use crate::error::{DoneError, DoneResult};
use crate::lamellae::{CommAtomic, CommProgress, CommRdma, CommShutdown};
use crate::report::AggregateReport;
use crate::topology::{TopologyError, ROOT_PE};

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    NonRoot,
}

/// How a PE left the protocol
#[derive(Debug, Clone, PartialEq)]
pub struct Termination {
    pub pe: usize,
    pub role: Role,
    /// the aggregate timing report, present only on the PE that printed it
    pub report: Option<AggregateReport>,
    /// pauses spent polling for global completion
    pub polls: u64,
}

impl DoneContext {
    /// Gather every PE's elapsed time. The root reads its own value locally.
    fn aggregate(&self) -> DoneResult<AggregateReport> {
        let elapsed = (0..self.topology.num_pes())
            .map(|pe| {
                self.comm
                    .get(pe, self.layout.elapsed_ms)
                    .map(f64::from_bits)
            })
            .collect::<Result<Vec<f64>, _>>()?;
        AggregateReport::from_elapsed(&elapsed)
            .ok_or(DoneError::Topology(TopologyError::NoPes))
    }

    /// Print the aggregate if this PE wins the one-time claim on it
    pub(super) fn announce_report(&self) -> DoneResult<Option<AggregateReport>> {
        if !self.claim_report()? {
            return Ok(None);
        }
        let aggregate = self.aggregate()?;
        println!("{}", aggregate);
        info!("{}", aggregate);
        Ok(Some(aggregate))
    }

    /// Print the aggregate exactly once, release every PE, wait for their acks, exit last.
    pub(crate) fn root_exit(&self, polls: u64) -> DoneResult<Termination> {
        let report = self.announce_report()?;

        self.comm.put(ROOT_PE, self.layout.root_go, 1)?;
        self.comm.quiet();

        let expected_acks = (self.topology.num_pes() - 1) as u64;
        let mut watch = DeadlockWatch::new(self.deadlock_timeout, "waiting for exit acknowledgements");
        spin_until(&self.backoff, &mut watch, self.my_pe, || {
            Ok::<_, DoneError>(self.comm.get(ROOT_PE, self.layout.exit_acks)? >= expected_acks)
        })?;

        debug!("pe {} (root) exiting after {} acks", self.my_pe, expected_acks);
        self.comm.quiet();
        self.comm.global_exit(0);
        Ok(Termination {
            pe: self.my_pe,
            role: Role::Root,
            report,
            polls,
        })
    }

    /// Wait for the root's go signal, acknowledge it, exit.
    pub(crate) fn non_root_exit(&self, polls: u64) -> DoneResult<Termination> {
        let mut watch = DeadlockWatch::new(self.deadlock_timeout, "waiting for the root to release");
        spin_until(&self.backoff, &mut watch, self.my_pe, || {
            Ok::<_, DoneError>(self.comm.get(ROOT_PE, self.layout.root_go)? != 0)
        })?;
        self.comm.atomic_fetch_add(ROOT_PE, self.layout.exit_acks, 1)?;
        self.comm.quiet();
        debug!("pe {} acknowledged the root and is exiting", self.my_pe);
        self.comm.global_exit(0);
        Ok(Termination {
            pe: self.my_pe,
            role: Role::NonRoot,
            report: None,
            polls,
        })
    }
}
