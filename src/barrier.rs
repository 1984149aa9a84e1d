use crate::backoff::{spin_until, Backoff, DeadlockWatch};
use crate::lamellae::{Comm, CommInfo, CommProgress, CommRdma, RdmaResult, SymAddr};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Counting barrier over a `num_pes` word area of the symmetric segment.
///
/// Each PE writes its barrier epoch into its own slot on every PE, then waits
/// for all of its local slots to reach that epoch. Epochs only increase, so a
/// fast PE entering the next barrier cannot confuse a slow one.
#[derive(Debug)]
pub(crate) struct Barrier {
    my_pe: usize,
    num_pes: usize,
    comm: Arc<Comm>,
    barrier_buf: SymAddr,
    barrier_cnt: AtomicU64,
    backoff: Backoff,
    deadlock_timeout: f64,
}

impl Barrier {
    pub(crate) fn new(
        comm: Arc<Comm>,
        barrier_buf: SymAddr,
        backoff: Backoff,
        deadlock_timeout: f64,
    ) -> Barrier {
        Barrier {
            my_pe: comm.my_pe(),
            num_pes: comm.num_pes(),
            comm,
            barrier_buf,
            barrier_cnt: AtomicU64::new(0),
            backoff,
            deadlock_timeout,
        }
    }

    fn check_barrier_vals(&self, barrier_id: u64) -> RdmaResult<bool> {
        for pe in 0..self.num_pes {
            if self.comm.get(self.my_pe, self.barrier_buf.offset(pe))? < barrier_id {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn put_barrier_val(&self, barrier_id: u64) -> RdmaResult<()> {
        for pe in 0..self.num_pes {
            self.comm
                .put(pe, self.barrier_buf.offset(self.my_pe), barrier_id)?;
        }
        self.comm.quiet();
        Ok(())
    }

    pub(crate) fn barrier(&self) -> RdmaResult<()> {
        if self.num_pes < 2 {
            return Ok(());
        }
        let barrier_id = self.barrier_cnt.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("pe {} entering barrier {}", self.my_pe, barrier_id);
        self.put_barrier_val(barrier_id)?;
        let mut watch = DeadlockWatch::new(self.deadlock_timeout, "waiting in a barrier");
        spin_until(&self.backoff, &mut watch, self.my_pe, || {
            self.check_barrier_vals(barrier_id)
        })?;
        Ok(())
    }
}
