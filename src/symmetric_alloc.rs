use crate::lamellae::{AllocError, AllocResult, SymAddr};

#[derive(Debug)]
struct Vma {
    name: &'static str,
    addr: usize,
    size: usize,
}

/// A bump allocator over word offsets.
///
/// Allocation never communicates: PEs that issue the same sequence of
/// `malloc` calls receive the same addresses.
#[derive(Debug)]
pub(crate) struct LinearAlloc {
    entries: Vec<Vma>,
    start_addr: usize,
    max_size: usize,
    next: usize,
    id: String,
}

impl LinearAlloc {
    pub(crate) fn new(id: String) -> LinearAlloc {
        LinearAlloc {
            entries: Vec::new(),
            start_addr: 0,
            max_size: 0,
            next: 0,
            id,
        }
    }

    pub(crate) fn init(&mut self, start_addr: usize, size: usize) {
        self.start_addr = start_addr;
        self.max_size = size;
        self.next = start_addr;
        self.entries.clear();
    }

    /// Reserve `size` words, remembering what the range is for in debug dumps
    pub(crate) fn malloc(&mut self, name: &'static str, size: usize) -> AllocResult<SymAddr> {
        if self.next + size > self.start_addr + self.max_size {
            return Err(AllocError::OutOfMemoryError(size));
        }
        let addr = self.next;
        self.entries.push(Vma { name, addr, size });
        self.next += size;
        Ok(SymAddr(addr))
    }

    pub(crate) fn occupied(&self) -> usize {
        self.next - self.start_addr
    }
}

impl std::fmt::Display for LinearAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}: ", self.id)?;
        for vma in &self.entries {
            write!(f, "[{} {}+{}]", vma.name, vma.addr, vma.size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_malloc() {
        let mut alloc = LinearAlloc::new("test_linear_malloc".to_string());
        alloc.init(0, 10);
        for i in 0..10 {
            assert_eq!(alloc.malloc("word", 1), Ok(SymAddr(i)));
        }
        assert_eq!(alloc.malloc("word", 1), Err(AllocError::OutOfMemoryError(1)));
        assert_eq!(alloc.occupied(), 10);
    }

    #[test]
    fn test_same_sequence_same_addrs() {
        let mut a = LinearAlloc::new("a".to_string());
        let mut b = LinearAlloc::new("b".to_string());
        a.init(4, 100);
        b.init(4, 100);
        for size in [3, 1, 7, 2] {
            assert_eq!(a.malloc("range", size), b.malloc("range", size));
        }
        assert_eq!(a.malloc("x", 5).unwrap(), SymAddr(4 + 13));
    }
}
