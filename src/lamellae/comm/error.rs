use crate::lamellae::SymAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    OutOfMemoryError(usize),
    SegmentMismatch { expected: usize, requested: usize },
    FabricAllocationError(String),
    IdError(String),
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AllocError::OutOfMemoryError(size) => {
                write!(f, "not enough symmetric memory to allocate {} words", size)
            }
            AllocError::SegmentMismatch {
                expected,
                requested,
            } => {
                write!(
                    f,
                    "symmetric segment already sized to {} words, pe requested {}",
                    expected, requested
                )
            }
            AllocError::FabricAllocationError(err) => {
                write!(f, "Fabric allocation error: {}", err)
            }
            AllocError::IdError(err) => {
                write!(f, "unable to determine pe identity: {}", err)
            }
        }
    }
}

impl std::error::Error for AllocError {}

pub type AllocResult<T> = Result<T, AllocError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdmaError {
    InvalidPe { pe: usize, num_pes: usize },
    OutOfBounds { addr: SymAddr, segment_words: usize },
    NotInitialized,
}

pub type RdmaResult<T> = Result<T, RdmaError>;

impl std::fmt::Display for RdmaError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RdmaError::InvalidPe { pe, num_pes } => {
                write!(f, "invalid pe {} (num_pes = {})", pe, num_pes)
            }
            RdmaError::OutOfBounds {
                addr,
                segment_words,
            } => {
                write!(
                    f,
                    "address {:?} outside of symmetric segment of {} words",
                    addr, segment_words
                )
            }
            RdmaError::NotInitialized => {
                write!(f, "symmetric segment used before the fabric was initialized")
            }
        }
    }
}

impl std::error::Error for RdmaError {}
