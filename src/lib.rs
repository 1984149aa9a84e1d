//! global-done is a hierarchical termination detector for PGAS jobs.
//!
//! Every processing element (PE) of a job marks itself locally done, and the
//! job must learn, without any central polling loop, the moment all of them
//! have. PEs are grouped into fixed-size leaf groups, and groups merge pairwise
//! up a binary tree. Completion of a group is decided entirely with one-sided
//! remote atomics: the last PE (or child group) to arrive at a group's counter
//! marks it done and carries completion to the parent. When the single top
//! group is done, PE 0 aggregates per-PE timings, prints one report, and
//! releases every PE into a coordinated exit, leaving only once all of
//! them have acknowledged.
//!
//! PEs reach each other's symmetric memory through a fabric backend ("lamellae").
//! Two exist: "local", where each PE is a thread of the current process, and
//! "shmem", where each PE is a process on the same node sharing a POSIX
//! shared memory segment.
//!
//! The dynamic tree is the default [`Strategy`]. A static tree polled by fixed
//! group owners, a flat star and a multi-level star ("hstar") are available
//! through [`DoneWorldBuilder::with_strategy`] or `GLOBAL_DONE_STRATEGY`.
//!
//! EXAMPLES
//! --------
//!
//! # Running a single PE
//! ```ignore
//! fn main() -> Result<(), global_done::DoneError> {
//!     let world = global_done::DoneWorldBuilder::new()
//!         .with_backend(global_done::Backend::Local)
//!         .build()?;
//!     // ... local work ...
//!     world.mark_local_done()?;
//!     let termination = world.run()?;
//!     assert!(termination.report.is_some());
//!     Ok(())
//! }
//! ```
//!
//! # Emulating a job with one thread per PE
//! ```ignore
//! use global_done::{DoneWorldBuilder, LocalFabric};
//!
//! let fabric = LocalFabric::new(4);
//! let handles: Vec<_> = (0..4)
//!     .map(|pe| {
//!         let fabric = fabric.clone();
//!         std::thread::spawn(move || {
//!             let world = DoneWorldBuilder::new()
//!                 .with_local_fabric(fabric, pe)
//!                 .with_leaf_span(2)
//!                 .build()
//!                 .unwrap();
//!             world.run().unwrap()
//!         })
//!     })
//!     .collect();
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert_eq!(fabric.exit_log().len(), 4);
//! ```

pub extern crate tracing;

mod arrival_gate;
mod backoff;
mod barrier;
mod env_var;
mod error;
mod global_done;
mod lamellae;
mod layout;
mod report;
mod symmetric_alloc;
mod topology;
mod world;

pub use crate::arrival_gate::Arrival;
pub use crate::backoff::Backoff;
pub use crate::env_var::{config, Config};
pub use crate::error::{DoneError, DoneResult};
pub use crate::global_done::{LeafOutcome, Propagation, Role, Strategy, Termination};
pub use crate::lamellae::comm::error::{AllocError, RdmaError};
pub use crate::lamellae::{Backend, ExitRecord, LocalFabric, SymAddr};
pub use crate::report::{AggregateReport, CSV_HEADER};
pub use crate::topology::{StarTopology, TopologyError, TopologyResult, TreeTopology, ROOT_PE};
pub use crate::world::{DoneWorld, DoneWorldBuilder};
