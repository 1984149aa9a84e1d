use shared_memory::*;
use tracing::{debug, trace};

use crate::lamellae::{AllocError, AllocResult};

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const HEADER_BYTES: usize = std::mem::size_of::<u64>();

/// A mapped shared memory object; the first word is the readiness header.
pub(crate) struct ShmemHandle {
    base_addr: *mut u8,
    num_bytes: usize,
    _shmem: Shmem,
}

unsafe impl Sync for ShmemHandle {}
unsafe impl Send for ShmemHandle {}

impl std::fmt::Debug for ShmemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmemHandle")
            .field("base_addr", &self.base_addr)
            .field("num_bytes", &self.num_bytes)
            .finish()
    }
}

impl ShmemHandle {
    /// start of the data area, just past the header
    pub(crate) fn data_ptr(&self) -> *mut u8 {
        unsafe { self.base_addr.add(HEADER_BYTES) }
    }
    pub(crate) fn data_bytes(&self) -> usize {
        self.num_bytes - HEADER_BYTES
    }
}

fn header_word(m: &Shmem) -> &AtomicU64 {
    unsafe { &*(m.as_ptr() as *const AtomicU64) }
}

/// Create or attach to the job's shared memory object.
///
/// The creating PE clears the header, zeroes the data area, then publishes
/// `header`; everyone else spins until that header is visible. An object left
/// behind by an earlier launch carries a different header, so no PE can start
/// on its stale contents.
#[tracing::instrument(skip_all, level = "debug")]
pub(crate) fn attach_to_shmem(
    job_id: usize,
    size: usize,
    id: &str,
    header: u64,
    create: bool,
) -> AllocResult<ShmemHandle> {
    let shmem_size = HEADER_BYTES + size;
    let shmem_id = format!("global_done_{}_{}_{}", job_id, shmem_size, id);

    let mut retry = 0;
    let m = loop {
        match ShmemConf::new()
            .size(shmem_size)
            .os_id(shmem_id.clone())
            .create()
        {
            Ok(m) => {
                trace!("created {:?}", shmem_id);
                break Ok(m);
            }
            Err(ShmemError::LinkExists)
            | Err(ShmemError::MappingIdExists)
            | Err(ShmemError::MapOpenFailed(_)) => {
                match ShmemConf::new().os_id(shmem_id.clone()).open() {
                    Ok(m) => {
                        trace!("attached {:?}", shmem_id);
                        break Ok(m);
                    }
                    Err(ShmemError::MapOpenFailed(_)) if retry < 5 => {
                        retry += 1;
                        std::thread::sleep(std::time::Duration::from_millis(50));
                    }
                    Err(e) => break Err(e),
                }
            }
            Err(e) => break Err(e),
        }
    };
    let mut m = m.map_err(|e| {
        AllocError::FabricAllocationError(format!(
            "unable to create shared memory {:?} {:?}",
            shmem_id, e
        ))
    })?;
    if m.len() < shmem_size {
        return Err(AllocError::OutOfMemoryError(size));
    }
    m.set_owner(create);

    if create {
        header_word(&m).store(0, Ordering::SeqCst);
        unsafe {
            std::ptr::write_bytes(m.as_ptr().add(HEADER_BYTES), 0, size);
        }
        header_word(&m).store(header, Ordering::SeqCst);
    }
    while header_word(&m).load(Ordering::SeqCst) != header {
        std::thread::yield_now()
    }
    debug!("shmem ready {:?}", shmem_id);

    Ok(ShmemHandle {
        base_addr: m.as_ptr(),
        num_bytes: shmem_size,
        _shmem: m,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_republishes_over_a_stale_object() {
        let job_id = std::process::id() as usize * 1000 + rand::random::<u16>() as usize;
        let words = 4;
        let size = words * std::mem::size_of::<u64>();
        let stale = attach_to_shmem(job_id, size, "stale_test", 0x51a1e, true).unwrap();
        unsafe {
            std::ptr::write_bytes(stale.data_ptr(), 0xab, size);
        }

        let fresh = attach_to_shmem(job_id, size, "stale_test", 0xf2e54, true).unwrap();
        let data = unsafe { std::slice::from_raw_parts(fresh.data_ptr() as *const u64, words) };
        assert!(data.iter().all(|w| *w == 0));
        let header = unsafe { &*(fresh.base_addr as *const AtomicU64) };
        assert_eq!(header.load(Ordering::SeqCst), 0xf2e54);
    }
}
