pub(crate) mod comm;
pub(crate) mod fabric;

pub(crate) use comm::ShmemComm;

use super::{AllocError, AllocResult, Comm, LamellaeInit};

use std::env;
use std::sync::Arc;

const SHMEM_HEADER_MAGIC: u64 = 0x676c_6f62_616c_646e;

fn env_parse<T>(name: &str, default: T) -> AllocResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| AllocError::IdError(format!("{}={:?}: {}", name, val, e))),
        Err(_e) => Ok(default),
    }
}

/// The readiness word published by PE 0. Never zero, so a cleared header is never mistaken for it.
pub(crate) fn segment_header(job_id: usize, launch_id: u64) -> u64 {
    match SHMEM_HEADER_MAGIC ^ job_id as u64 ^ launch_id.rotate_left(17) {
        0 => SHMEM_HEADER_MAGIC,
        header => header,
    }
}

pub(crate) struct ShmemBuilder {
    my_pe: usize,
    num_pes: usize,
    job_id: usize,
    /// distinguishes this launch from an earlier one that reused the job id
    launch_id: u64,
}

impl ShmemBuilder {
    pub(crate) fn new() -> ShmemBuilder {
        ShmemBuilder {
            my_pe: 0,
            num_pes: 1,
            job_id: 0,
            launch_id: 0,
        }
    }
}

impl LamellaeInit for ShmemBuilder {
    fn init_fabric(&mut self) -> AllocResult<(usize, usize)> {
        self.num_pes = env_parse("GLOBAL_DONE_NUM_PES", 1)?;
        self.my_pe = env_parse("GLOBAL_DONE_PE_ID", 0)?;
        self.job_id = env_parse("GLOBAL_DONE_JOB_ID", 0)?;
        self.launch_id = env_parse("GLOBAL_DONE_LAUNCH_ID", 0)?;
        if self.num_pes == 0 || self.my_pe >= self.num_pes {
            return Err(AllocError::IdError(format!(
                "pe {} is not part of a job of {} pes",
                self.my_pe, self.num_pes
            )));
        }
        Ok((self.my_pe, self.num_pes))
    }

    fn init_comm(&mut self, segment_words: usize) -> AllocResult<Arc<Comm>> {
        let bytes = segment_words * self.num_pes * std::mem::size_of::<u64>();
        let header = segment_header(self.job_id, self.launch_id);
        let handle =
            fabric::attach_to_shmem(self.job_id, bytes, "segments", header, self.my_pe == 0)?;
        if handle.data_bytes() < bytes {
            return Err(AllocError::OutOfMemoryError(segment_words));
        }
        Ok(Arc::new(
            ShmemComm::new(self.my_pe, self.num_pes, segment_words, handle).into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaunch_changes_the_header() {
        let first = segment_header(42, 7);
        assert_ne!(first, segment_header(42, 8));
        assert_ne!(first, segment_header(43, 7));
        assert_eq!(first, segment_header(42, 7));
        assert_ne!(segment_header(0, 0), 0);
    }
}
