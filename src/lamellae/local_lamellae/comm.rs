use crate::lamellae::{
    check_target, Backend, CommAtomic, CommInfo, CommProgress, CommRdma, CommShutdown, RdmaError,
    RdmaResult, SymAddr,
};

use super::LocalFabric;
use crate::topology::ROOT_PE;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct LocalComm {
    my_pe: usize,
    num_pes: usize,
    segment_words: usize,
    fabric: Arc<LocalFabric>,
}

impl LocalComm {
    pub(crate) fn new(my_pe: usize, fabric: Arc<LocalFabric>) -> LocalComm {
        let segment_words = fabric.segment(my_pe).map_or(0, |s| s.len());
        LocalComm {
            my_pe,
            num_pes: fabric.num_pes(),
            segment_words,
            fabric,
        }
    }

    fn word(&self, pe: usize, addr: SymAddr) -> RdmaResult<&AtomicU64> {
        check_target(pe, self.num_pes, addr, self.segment_words)?;
        self.fabric
            .segment(pe)
            .map(|s| &s[addr.index()])
            .ok_or(RdmaError::NotInitialized)
    }
}

impl CommInfo for LocalComm {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
    fn segment_words(&self) -> usize {
        self.segment_words
    }
}

impl CommRdma for LocalComm {
    fn get(&self, pe: usize, addr: SymAddr) -> RdmaResult<u64> {
        Ok(self.word(pe, addr)?.load(Ordering::SeqCst))
    }
    fn put(&self, pe: usize, addr: SymAddr, value: u64) -> RdmaResult<()> {
        self.word(pe, addr)?.store(value, Ordering::SeqCst);
        Ok(())
    }
}

impl CommAtomic for LocalComm {
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

impl CommProgress for LocalComm {
    fn quiet(&self) {}
}

impl CommShutdown for LocalComm {
    // the process is shared with the other PEs, so exiting is only recorded.
    // The root ends the job, so it is recorded after everyone else.
    fn global_exit(&self, status: i32) {
        if self.my_pe == ROOT_PE {
            self.fabric.wait_for_other_exits(self.my_pe);
        }
        self.fabric.record_exit(self.my_pe, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lamellae::local_lamellae::LocalBuilder;
    use crate::lamellae::{Comm, LamellaeInit};

    fn comms(num_pes: usize, words: usize) -> Vec<Arc<Comm>> {
        let fabric = LocalFabric::new(num_pes);
        (0..num_pes)
            .map(|pe| {
                let mut builder = LocalBuilder::new(Some((fabric.clone(), pe)));
                builder.init_fabric().unwrap();
                builder.init_comm(words).unwrap()
            })
            .collect()
    }

    #[test]
    fn put_get_across_pes() {
        let comms = comms(3, 4);
        comms[0].put(2, SymAddr(1), 42).unwrap();
        assert_eq!(comms[1].get(2, SymAddr(1)).unwrap(), 42);
        assert_eq!(comms[2].get(2, SymAddr(0)).unwrap(), 0);
    }

    #[test]
    fn atomics_return_prior_value() {
        let comms = comms(2, 2);
        assert_eq!(comms[1].atomic_fetch_add(0, SymAddr(0), 1).unwrap(), 0);
        assert_eq!(comms[0].atomic_fetch_add(0, SymAddr(0), 1).unwrap(), 1);
        assert_eq!(comms[0].atomic_compare_swap(0, SymAddr(1), 0, 1).unwrap(), 0);
        assert_eq!(comms[1].atomic_compare_swap(0, SymAddr(1), 0, 1).unwrap(), 1);
    }

    #[test]
    fn rejects_bad_targets() {
        let comms = comms(2, 2);
        assert_eq!(
            comms[0].get(2, SymAddr(0)),
            Err(RdmaError::InvalidPe { pe: 2, num_pes: 2 })
        );
        assert!(matches!(
            comms[0].put(1, SymAddr(2), 1),
            Err(RdmaError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn mismatched_segment_sizes_fail() {
        let fabric = LocalFabric::new(2);
        let mut b0 = LocalBuilder::new(Some((fabric.clone(), 0)));
        let mut b1 = LocalBuilder::new(Some((fabric.clone(), 1)));
        b0.init_comm(8).unwrap();
        assert!(b1.init_comm(9).is_err());
    }

    #[test]
    fn exit_is_recorded_once() {
        let comms = comms(2, 1);
        comms[1].global_exit(0);
        comms[1].global_exit(0);
        comms[0].global_exit(0);
        let Comm::Local(local) = &*comms[0] else {
            panic!("expected local comm")
        };
        let log = local.fabric.exit_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].pe, 1);
        assert_eq!(log[1].pe, 0);
    }

    #[test]
    fn root_exit_waits_for_the_others() {
        let comms = comms(3, 1);
        let Comm::Local(local) = &*comms[0] else {
            panic!("expected local comm")
        };
        let fabric = local.fabric.clone();
        std::thread::scope(|s| {
            let root = s.spawn(|| comms[0].global_exit(0));
            std::thread::sleep(std::time::Duration::from_millis(10));
            assert!(!fabric.has_exited(0));
            comms[2].global_exit(0);
            comms[1].global_exit(3);
            root.join().unwrap();
        });
        let log = fabric.exit_log();
        let order: Vec<usize> = log.iter().map(|r| r.pe).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert_eq!(log[1].status, 3);
    }
}
