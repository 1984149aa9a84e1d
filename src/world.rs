use crate::backoff::Backoff;
use crate::barrier::Barrier;
use crate::config;
use crate::error::DoneResult;
use crate::global_done::{DoneContext, LeafOutcome, Strategy, Termination};
use crate::lamellae::{
    create_lamellae, AllocError, Backend, CommInfo, CommRdma, LamellaeInit, LocalFabric,
};
use crate::layout::DoneLayout;
use crate::topology::{StarTopology, TreeTopology, ROOT_PE};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::*;

/// One PE's handle on a job-wide termination protocol.
///
/// Constructing a `DoneWorld` is collective: every PE of the job must build one,
/// and `build` returns only after all of them have mapped their symmetric state.
/// The run clock starts at that point.
#[derive(Debug)]
pub struct DoneWorld {
    ctx: DoneContext,
    my_pe: usize,
    num_pes: usize,
    barrier: Barrier,
    start: Instant,
    local_done: AtomicBool,
}

impl DoneWorld {
    pub fn my_pe(&self) -> usize {
        self.my_pe
    }

    pub fn num_pes(&self) -> usize {
        self.num_pes
    }

    pub fn backend(&self) -> Backend {
        self.ctx.comm.backend()
    }

    pub fn strategy(&self) -> Strategy {
        self.ctx.strategy
    }

    /// The binary group tree. Its flags are only set by the tree strategies.
    pub fn topology(&self) -> &TreeTopology {
        &self.ctx.topology
    }

    /// The fan-in tree of the star strategies
    pub fn star_topology(&self) -> Option<&StarTopology> {
        self.ctx.star.as_ref()
    }

    /// Record the time since the world was built as this PE's elapsed time and mark it locally done
    #[tracing::instrument(skip_all)]
    pub fn mark_local_done(&self) -> DoneResult<f64> {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.record_elapsed_ms(elapsed_ms)?;
        Ok(elapsed_ms)
    }

    /// Mark this PE locally done with an explicit elapsed time
    pub fn record_elapsed_ms(&self, elapsed_ms: f64) -> DoneResult<()> {
        self.ctx
            .comm
            .put(self.my_pe, self.ctx.layout.elapsed_ms, elapsed_ms.to_bits())?;
        self.ctx.comm.put(self.my_pe, self.ctx.layout.local_done, 1)?;
        self.local_done.store(true, Ordering::SeqCst);
        trace!("pe {} locally done after {:.3} ms", self.my_pe, elapsed_ms);
        Ok(())
    }

    pub fn is_local_done(&self) -> bool {
        self.local_done.load(Ordering::SeqCst)
    }

    /// Enter the termination protocol and block until this PE performs its collective exit.
    ///
    /// A PE that has not marked itself locally done is marked now.
    #[tracing::instrument(skip_all)]
    pub fn run(&self) -> DoneResult<Termination> {
        if !self.is_local_done() {
            self.mark_local_done()?;
        }
        self.ctx.drive(&self.barrier)
    }

    /// A single, non-blocking attempt at this PE's leaf group
    #[doc(hidden)]
    pub fn try_complete_leaf(&self) -> DoneResult<LeafOutcome> {
        self.ctx.try_complete_leaf()
    }

    pub fn group_done(&self, level: usize, gidx: usize) -> DoneResult<bool> {
        self.ctx.is_group_done(level, gidx)
    }

    /// The PE that completed group `(level, gidx)`, if it is done
    pub fn group_leader(&self, level: usize, gidx: usize) -> DoneResult<Option<usize>> {
        self.ctx.group_leader(level, gidx)
    }

    pub fn global_done(&self) -> DoneResult<bool> {
        self.ctx.is_globally_done()
    }

    /// Exit acknowledgements collected on the root so far
    #[doc(hidden)]
    pub fn exit_acks(&self) -> DoneResult<u64> {
        Ok(self.ctx.comm.get(ROOT_PE, self.ctx.layout.exit_acks)?)
    }

    /// Whether the root has released the other PEs to exit
    #[doc(hidden)]
    pub fn root_go(&self) -> DoneResult<bool> {
        Ok(self.ctx.comm.get(ROOT_PE, self.ctx.layout.root_go)? != 0)
    }

    /// Collective barrier across every PE of the job
    pub fn barrier(&self) -> DoneResult<()> {
        Ok(self.barrier.barrier()?)
    }
}

/// An implementation of the Builder design pattern, used to construct an instance of a DoneWorld.
///
/// Defaults come from the `GLOBAL_DONE_*` environment variables.
#[derive(Debug)]
pub struct DoneWorldBuilder {
    backend: Backend,
    local: Option<(Arc<LocalFabric>, usize)>,
    strategy: Strategy,
    leaf_span: usize,
    branch: usize,
    max_levels: Option<usize>,
    backoff: Backoff,
    deadlock_timeout: f64,
}

impl DoneWorldBuilder {
    #[tracing::instrument(skip_all)]
    pub fn new() -> DoneWorldBuilder {
        let config = config();
        DoneWorldBuilder {
            backend: Default::default(),
            local: None,
            strategy: Default::default(),
            leaf_span: config.group_size,
            branch: config.branch_k,
            max_levels: config.max_levels,
            backoff: Backoff::from_config(config),
            deadlock_timeout: config.deadlock_timeout,
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> DoneWorldBuilder {
        self.backend = backend;
        self
    }

    /// Join `fabric` as PE `pe`; selects the local backend
    pub fn with_local_fabric(mut self, fabric: Arc<LocalFabric>, pe: usize) -> DoneWorldBuilder {
        self.backend = Backend::Local;
        self.local = Some((fabric, pe));
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> DoneWorldBuilder {
        self.strategy = strategy;
        self
    }

    /// Children per group above the leaves, used by [`Strategy::HStar`]
    pub fn with_branch(mut self, branch: usize) -> DoneWorldBuilder {
        self.branch = branch;
        self
    }

    /// Number of PEs per leaf group
    pub fn with_leaf_span(mut self, leaf_span: usize) -> DoneWorldBuilder {
        self.leaf_span = leaf_span;
        self
    }

    pub fn with_max_levels(mut self, max_levels: Option<usize>) -> DoneWorldBuilder {
        self.max_levels = max_levels;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> DoneWorldBuilder {
        self.backoff = backoff;
        self
    }

    pub fn with_deadlock_timeout(mut self, seconds: f64) -> DoneWorldBuilder {
        self.deadlock_timeout = seconds;
        self
    }

    /// Instantiate a DoneWorld. Collective over every PE of the job.
    ///
    /// Topology errors are raised before any symmetric memory is mapped.
    #[tracing::instrument(skip_all)]
    pub fn build(self) -> DoneResult<DoneWorld> {
        let mut lamellae_builder = create_lamellae(self.backend, self.local);
        let (my_pe, num_pes) = lamellae_builder.init_fabric()?;
        let (tree_levels, star) = match self.strategy {
            Strategy::DynamicTree | Strategy::StaticTree => (self.max_levels, None),
            Strategy::Star => (None, Some(StarTopology::flat(num_pes, self.leaf_span)?)),
            Strategy::HStar => (
                None,
                Some(StarTopology::new(
                    num_pes,
                    self.leaf_span,
                    self.branch,
                    self.max_levels,
                )?),
            ),
        };
        let topology = TreeTopology::new(num_pes, self.leaf_span, tree_levels)?;
        let layout = DoneLayout::new(&topology, star.as_ref())?;
        let comm = lamellae_builder.init_comm(layout.segment_words())?;
        if comm.segment_words() != layout.segment_words() {
            return Err(AllocError::SegmentMismatch {
                expected: layout.segment_words(),
                requested: comm.segment_words(),
            }
            .into());
        }
        if my_pe == ROOT_PE {
            debug!("{:?} topology: {}", self.strategy, topology);
            if let Some(star) = &star {
                debug!("fan-in topology: {}", star);
            }
            trace!("symmetric layout: {}", layout);
        }

        let barrier = Barrier::new(
            comm.clone(),
            layout.barrier,
            self.backoff,
            self.deadlock_timeout,
        );
        barrier.barrier()?;

        let ctx = DoneContext::new(
            comm,
            my_pe,
            self.strategy,
            topology,
            star,
            layout,
            self.backoff,
            self.deadlock_timeout,
        );
        Ok(DoneWorld {
            ctx,
            my_pe,
            num_pes,
            barrier,
            start: Instant::now(),
            local_done: AtomicBool::new(false),
        })
    }
}

impl Default for DoneWorldBuilder {
    fn default() -> Self {
        DoneWorldBuilder::new()
    }
}
