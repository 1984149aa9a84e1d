pub(crate) mod comm;
pub(crate) use comm::LocalComm;

use super::{AllocError, AllocResult, Comm, LamellaeInit};
use crate::backoff::DeadlockWatch;
use crate::config;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// A record of one PE performing its collective exit on the local backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRecord {
    pub pe: usize,
    pub status: i32,
    /// position of this exit in the job-wide exit order
    pub seq: usize,
}

/// The symmetric memory of a job whose PEs are threads of one process.
///
/// Segments are created lazily by the first PE to initialize its comm, every
/// other PE must request the same size.
#[derive(Debug)]
pub struct LocalFabric {
    num_pes: usize,
    segments: OnceLock<Vec<Box<[AtomicU64]>>>,
    exit_seq: AtomicUsize,
    exits: Mutex<Vec<ExitRecord>>,
}

impl LocalFabric {
    pub fn new(num_pes: usize) -> Arc<LocalFabric> {
        Arc::new(LocalFabric {
            num_pes,
            segments: OnceLock::new(),
            exit_seq: AtomicUsize::new(0),
            exits: Mutex::new(Vec::new()),
        })
    }

    pub fn num_pes(&self) -> usize {
        self.num_pes
    }

    /// Every collective exit performed so far, in the order they happened
    pub fn exit_log(&self) -> Vec<ExitRecord> {
        let mut log = self.exits.lock().clone();
        log.sort_by_key(|r| r.seq);
        log
    }

    pub fn has_exited(&self, pe: usize) -> bool {
        self.exits.lock().iter().any(|r| r.pe == pe)
    }

    fn init_segments(&self, segment_words: usize) -> AllocResult<()> {
        let segments = self.segments.get_or_init(|| {
            (0..self.num_pes)
                .map(|_| (0..segment_words).map(|_| AtomicU64::new(0)).collect())
                .collect()
        });
        let expected = segments.first().map_or(0, |s| s.len());
        if expected != segment_words {
            return Err(AllocError::SegmentMismatch {
                expected,
                requested: segment_words,
            });
        }
        Ok(())
    }

    fn segment(&self, pe: usize) -> Option<&[AtomicU64]> {
        self.segments.get().and_then(|s| s.get(pe)).map(|s| &s[..])
    }

    fn wait_for_other_exits(&self, pe: usize) {
        let mut watch = DeadlockWatch::new(
            config().deadlock_timeout,
            "waiting for the other pes to exit",
        );
        while self.exits.lock().iter().filter(|r| r.pe != pe).count() + 1 < self.num_pes {
            std::thread::yield_now();
            watch.check(pe);
        }
    }

    fn record_exit(&self, pe: usize, status: i32) {
        let mut exits = self.exits.lock();
        if exits.iter().any(|r| r.pe == pe) {
            return;
        }
        let seq = self.exit_seq.fetch_add(1, Ordering::SeqCst);
        exits.push(ExitRecord { pe, status, seq });
    }
}

pub(crate) struct LocalBuilder {
    my_pe: usize,
    fabric: Arc<LocalFabric>,
}

impl LocalBuilder {
    pub(crate) fn new(local: Option<(Arc<LocalFabric>, usize)>) -> LocalBuilder {
        match local {
            Some((fabric, my_pe)) => LocalBuilder { my_pe, fabric },
            None => LocalBuilder {
                my_pe: 0,
                fabric: LocalFabric::new(1),
            },
        }
    }
}

impl LamellaeInit for LocalBuilder {
    fn init_fabric(&mut self) -> AllocResult<(usize, usize)> {
        if self.my_pe >= self.fabric.num_pes() {
            return Err(AllocError::IdError(format!(
                "pe {} is not part of a local fabric of {} pes",
                self.my_pe,
                self.fabric.num_pes()
            )));
        }
        Ok((self.my_pe, self.fabric.num_pes()))
    }

    fn init_comm(&mut self, segment_words: usize) -> AllocResult<Arc<Comm>> {
        self.fabric.init_segments(segment_words)?;
        Ok(Arc::new(
            LocalComm::new(self.my_pe, self.fabric.clone()).into(),
        ))
    }
}
