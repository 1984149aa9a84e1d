use crate::lamellae::{Comm, CommAtomic, RdmaResult, SymAddr};

/// The outcome of one arrival at a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    /// the counter value before this arrival
    pub prior: u64,
    /// true for exactly one arrival: the one that brings the count to `expected`
    pub is_last_arrival: bool,
}

/// A remote counter that elects the last of `expected` arrivals.
///
/// The fabric orders every fetch-add on the counter, so only one caller can
/// observe `prior + 1 == expected`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AtomicArrivalGate {
    host: usize,
    counter: SymAddr,
    expected: usize,
}

impl AtomicArrivalGate {
    pub(crate) fn new(host: usize, counter: SymAddr, expected: usize) -> AtomicArrivalGate {
        AtomicArrivalGate {
            host,
            counter,
            expected,
        }
    }

    pub(crate) fn arrive(&self, comm: &Comm) -> RdmaResult<Arrival> {
        let prior = comm.atomic_fetch_add(self.host, self.counter, 1)?;
        Ok(Arrival {
            prior,
            is_last_arrival: prior + 1 == self.expected as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lamellae::{create_lamellae, Backend, LamellaeInit, LocalFabric};
    use rand::seq::SliceRandom;
    use std::sync::Arc;

    fn local_comms(num_pes: usize) -> Vec<Arc<Comm>> {
        let fabric = LocalFabric::new(num_pes);
        (0..num_pes)
            .map(|pe| {
                let mut builder = create_lamellae(Backend::Local, Some((fabric.clone(), pe)));
                builder.init_fabric().unwrap();
                builder.init_comm(1).unwrap()
            })
            .collect()
    }

    #[test]
    fn exactly_one_last_arrival_under_contention() {
        for size in 1..=16 {
            let comms = local_comms(size);
            let host = size / 2;
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    std::thread::spawn(move || {
                        AtomicArrivalGate::new(host, SymAddr(0), size)
                            .arrive(&comm)
                            .unwrap()
                    })
                })
                .collect();
            let arrivals: Vec<Arrival> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(arrivals.iter().filter(|a| a.is_last_arrival).count(), 1);
            let mut priors: Vec<u64> = arrivals.iter().map(|a| a.prior).collect();
            priors.sort();
            assert_eq!(priors, (0..size as u64).collect::<Vec<_>>());
            let last = arrivals.iter().find(|a| a.is_last_arrival).unwrap();
            assert_eq!(last.prior, size as u64 - 1);
        }
    }

    #[test]
    fn random_orders_elect_the_final_arrival() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let comms = local_comms(7);
            let mut order: Vec<usize> = (0..7).collect();
            order.shuffle(&mut rng);
            let gate = AtomicArrivalGate::new(0, SymAddr(0), 7);
            let winners: Vec<usize> = order
                .iter()
                .filter(|pe| gate.arrive(&comms[**pe]).unwrap().is_last_arrival)
                .copied()
                .collect();
            assert_eq!(winners, vec![*order.last().unwrap()]);
        }
    }
}
