use crate::config;
use std::sync::Arc;

use enum_dispatch::enum_dispatch;

pub(crate) mod comm;
pub(crate) use comm::*;

pub(crate) mod local_lamellae;
pub use local_lamellae::{ExitRecord, LocalFabric};
use local_lamellae::{LocalBuilder, LocalComm};

pub(crate) mod shmem_lamellae;
use shmem_lamellae::{ShmemBuilder, ShmemComm};

/// The list of available fabric backends, used to specify how PEs reach each other's symmetric memory
#[derive(
    serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy,
)]
pub enum Backend {
    /// The Local backend -- every PE is a thread of the current process
    Local,
    /// The Shmem backend -- one process per PE, single node, POSIX shared memory
    Shmem,
}

impl Default for Backend {
    fn default() -> Self {
        match config().backend.as_str() {
            "shmem" => Backend::Shmem,
            _ => Backend::Local,
        }
    }
}

/// A word offset into the symmetric segment.
///
/// Every PE lays out its segment identically, so the same `SymAddr` names the
/// same field on every PE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymAddr(pub(crate) usize);

impl SymAddr {
    pub(crate) fn offset(&self, words: usize) -> SymAddr {
        SymAddr(self.0 + words)
    }
    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

#[enum_dispatch(CommInfo, CommRdma, CommAtomic, CommProgress, CommShutdown)]
#[derive(Debug)]
pub(crate) enum Comm {
    Local(LocalComm),
    Shmem(ShmemComm),
}

#[enum_dispatch(LamellaeInit)]
pub(crate) enum LamellaeBuilder {
    LocalBuilder,
    ShmemBuilder,
}

#[enum_dispatch]
pub(crate) trait LamellaeInit {
    /// Discover (my_pe, num_pes) before anything is allocated
    fn init_fabric(&mut self) -> AllocResult<(usize, usize)>;
    /// Map a symmetric segment of `segment_words` words on every PE
    fn init_comm(&mut self, segment_words: usize) -> AllocResult<Arc<Comm>>;
}

pub(crate) fn create_lamellae(
    backend: Backend,
    local: Option<(Arc<LocalFabric>, usize)>,
) -> LamellaeBuilder {
    match backend {
        Backend::Shmem => LamellaeBuilder::ShmemBuilder(ShmemBuilder::new()),
        Backend::Local => LamellaeBuilder::LocalBuilder(LocalBuilder::new(local)),
    }
}
