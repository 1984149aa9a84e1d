use crate::lamellae::{
    check_target, Backend, CommAtomic, CommInfo, CommProgress, CommRdma, CommShutdown, RdmaError,
    RdmaResult, SymAddr,
};

use super::fabric::ShmemHandle;

use parking_lot::Mutex;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug)]
pub(crate) struct ShmemComm {
    my_pe: usize,
    num_pes: usize,
    segment_words: usize,
    base_address: usize,
    handle: Mutex<Option<ShmemHandle>>,
}

impl ShmemComm {
    pub(crate) fn new(
        my_pe: usize,
        num_pes: usize,
        segment_words: usize,
        handle: ShmemHandle,
    ) -> ShmemComm {
        ShmemComm {
            my_pe,
            num_pes,
            segment_words,
            base_address: handle.data_ptr() as usize,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn word(&self, pe: usize, addr: SymAddr) -> RdmaResult<&AtomicU64> {
        check_target(pe, self.num_pes, addr, self.segment_words)?;
        if self.handle.lock().is_none() {
            return Err(RdmaError::NotInitialized);
        }
        let offset = (pe * self.segment_words + addr.index()) * std::mem::size_of::<u64>();
        Ok(unsafe { &*((self.base_address + offset) as *const AtomicU64) })
    }
}

impl CommInfo for ShmemComm {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Shmem
    }
    fn segment_words(&self) -> usize {
        self.segment_words
    }
}

impl CommRdma for ShmemComm {
    fn get(&self, pe: usize, addr: SymAddr) -> RdmaResult<u64> {
        Ok(self.word(pe, addr)?.load(Ordering::SeqCst))
    }
    fn put(&self, pe: usize, addr: SymAddr, value: u64) -> RdmaResult<()> {
        self.word(pe, addr)?.store(value, Ordering::SeqCst);
        Ok(())
    }
}

impl CommAtomic for ShmemComm {
    fn atomic_fetch_add(&self, pe: usize, addr: SymAddr, delta: u64) -> RdmaResult<u64> {
        Ok(self.word(pe, addr)?.fetch_add(delta, Ordering::SeqCst))
    }
    fn atomic_compare_swap(
        &self,
        pe: usize,
        addr: SymAddr,
        expected: u64,
        new: u64,
    ) -> RdmaResult<u64> {
        match self.word(pe, addr)?.compare_exchange(
            expected,
            new,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(old) | Err(old) => Ok(old),
        }
    }
}

impl CommProgress for ShmemComm {
    fn quiet(&self) {
        fence(Ordering::SeqCst);
    }
}

impl CommShutdown for ShmemComm {
    fn global_exit(&self, status: i32) {
        self.quiet();
        // dropping the handle unlinks the object when this PE created it
        let handle = self.handle.lock().take();
        drop(handle);
        debug!("pe {} exiting with status {}", self.my_pe, status);
        std::process::exit(status);
    }
}
