use crate::lamellae::{AllocError, RdmaError};
use crate::topology::TopologyError;

/// Errors surfaced by building a world or running the termination protocol
#[derive(Debug, Clone, PartialEq)]
pub enum DoneError {
    /// the group tree could never complete, raised before the protocol starts
    Topology(TopologyError),
    /// the fabric could not provide the symmetric segment
    Alloc(AllocError),
    /// a remote operation was rejected by the fabric
    Rdma(RdmaError),
}

pub type DoneResult<T> = Result<T, DoneError>;

impl std::fmt::Display for DoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DoneError::Topology(e) => write!(f, "topology misconfiguration: {}", e),
            DoneError::Alloc(e) => write!(f, "symmetric allocation failed: {}", e),
            DoneError::Rdma(e) => write!(f, "remote memory access failed: {}", e),
        }
    }
}

impl std::error::Error for DoneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DoneError::Topology(e) => Some(e),
            DoneError::Alloc(e) => Some(e),
            DoneError::Rdma(e) => Some(e),
        }
    }
}

impl From<TopologyError> for DoneError {
    fn from(e: TopologyError) -> Self {
        DoneError::Topology(e)
    }
}

impl From<AllocError> for DoneError {
    fn from(e: AllocError) -> Self {
        DoneError::Alloc(e)
    }
}

impl From<RdmaError> for DoneError {
    fn from(e: RdmaError) -> Self {
        DoneError::Rdma(e)
    }
}
