pub(crate) mod error;
pub use error::*;

use super::{Backend, SymAddr};
use enum_dispatch::enum_dispatch;

#[enum_dispatch]
pub(crate) trait CommInfo {
    fn my_pe(&self) -> usize;
    fn num_pes(&self) -> usize;
    fn backend(&self) -> Backend;
    fn segment_words(&self) -> usize;
}

/// One-sided reads and writes of single symmetric words
#[enum_dispatch]
pub(crate) trait CommRdma {
    fn get(&self, pe: usize, addr: SymAddr) -> RdmaResult<u64>;
    fn put(&self, pe: usize, addr: SymAddr, value: u64) -> RdmaResult<()>;
}

/// Remote atomics; both return the value held before the operation
#[enum_dispatch]
pub(crate) trait CommAtomic {
    fn atomic_fetch_add(&self, pe: usize, addr: SymAddr, delta: u64) -> RdmaResult<u64>;
    fn atomic_compare_swap(
        &self,
        pe: usize,
        addr: SymAddr,
        expected: u64,
        new: u64,
    ) -> RdmaResult<u64>;
}

#[enum_dispatch]
pub(crate) trait CommProgress {
    /// Wait for completion of every outstanding put issued by this PE
    fn quiet(&self);
}

#[enum_dispatch]
pub(crate) trait CommShutdown {
    /// Terminal, job-wide exit. May be called redundantly by any PE.
    fn global_exit(&self, status: i32);
}

/// Bounds checks shared by the backends
pub(crate) fn check_target(
    pe: usize,
    num_pes: usize,
    addr: SymAddr,
    segment_words: usize,
) -> RdmaResult<()> {
    if pe >= num_pes {
        return Err(RdmaError::InvalidPe { pe, num_pes });
    }
    if addr.index() >= segment_words {
        return Err(RdmaError::OutOfBounds {
            addr,
            segment_words,
        });
    }
    Ok(())
}
