use crate::lamellae::{AllocResult, SymAddr};
use crate::symmetric_alloc::LinearAlloc;
use crate::topology::{StarTopology, TreeTopology};

/// Leaders are stored as `pe + 1` so an all-zero segment means "no leader yet"
pub(crate) fn encode_leader(pe: usize) -> u64 {
    pe as u64 + 1
}

pub(crate) fn decode_leader(word: u64) -> Option<usize> {
    word.checked_sub(1).map(|pe| pe as usize)
}

#[derive(Debug, Clone, Copy)]
struct LevelAddrs {
    done: SymAddr,
    leader: SymAddr,
    arrivals: SymAddr,
}

#[derive(Debug, Clone, Copy)]
struct FanInLevel {
    slots: SymAddr,
    capacity: usize,
    tokens: SymAddr,
}

/// Mailboxes of the star strategies: one slot per child at every group owner,
/// a broadcast token per group and a per-PE termination gate.
#[derive(Debug)]
pub(crate) struct FanInAddrs {
    pub(crate) gate: SymAddr,
    levels: Vec<FanInLevel>,
}

impl FanInAddrs {
    pub(crate) fn child_slot(&self, level: usize, gidx: usize, slot: usize) -> SymAddr {
        let lvl = &self.levels[level];
        lvl.slots.offset(gidx * lvl.capacity + slot)
    }

    pub(crate) fn token(&self, level: usize, gidx: usize) -> SymAddr {
        self.levels[level].tokens.offset(gidx)
    }
}

/// Where every piece of protocol state lives inside the symmetric segment.
///
/// Group state is only ever touched on the group's owner PE and the global
/// state only on the root, but every PE reserves the same words so the
/// addresses agree everywhere.
#[derive(Debug)]
pub(crate) struct DoneLayout {
    pub(crate) local_done: SymAddr,
    pub(crate) elapsed_ms: SymAddr,
    pub(crate) agg_printed: SymAddr,
    pub(crate) root_go: SymAddr,
    pub(crate) exit_acks: SymAddr,
    pub(crate) barrier: SymAddr,
    levels: Vec<LevelAddrs>,
    pub(crate) fan_in: Option<FanInAddrs>,
    alloc: LinearAlloc,
}

impl DoneLayout {
    pub(crate) fn new(
        topology: &TreeTopology,
        star: Option<&StarTopology>,
    ) -> AllocResult<DoneLayout> {
        let group_words: usize = (0..topology.num_levels())
            .map(|l| 3 * topology.num_groups_at_level(l))
            .sum();
        let fan_in_words = star.map_or(0, |star| {
            1 + (0..star.num_levels())
                .map(|l| star.num_groups_at_level(l) * (star.slot_capacity(l) + 1))
                .sum::<usize>()
        });
        let total = 5 + topology.num_pes() + group_words + fan_in_words;

        let mut alloc = LinearAlloc::new("done_layout".to_string());
        alloc.init(0, total);
        let local_done = alloc.malloc("local_done", 1)?;
        let elapsed_ms = alloc.malloc("elapsed_ms", 1)?;
        let agg_printed = alloc.malloc("agg_printed", 1)?;
        let root_go = alloc.malloc("root_go", 1)?;
        let exit_acks = alloc.malloc("exit_acks", 1)?;
        let barrier = alloc.malloc("barrier", topology.num_pes())?;
        let mut levels = Vec::with_capacity(topology.num_levels());
        for level in 0..topology.num_levels() {
            let ng = topology.num_groups_at_level(level);
            levels.push(LevelAddrs {
                done: alloc.malloc("group_done", ng)?,
                leader: alloc.malloc("group_leader", ng)?,
                arrivals: alloc.malloc("arrival_count", ng)?,
            });
        }
        let fan_in = match star {
            Some(star) => {
                let gate = alloc.malloc("termination_gate", 1)?;
                let mut levels = Vec::with_capacity(star.num_levels());
                for level in 0..star.num_levels() {
                    let ng = star.num_groups_at_level(level);
                    let capacity = star.slot_capacity(level);
                    levels.push(FanInLevel {
                        slots: alloc.malloc("child_done", ng * capacity)?,
                        capacity,
                        tokens: alloc.malloc("bcast_token", ng)?,
                    });
                }
                Some(FanInAddrs { gate, levels })
            }
            None => None,
        };
        Ok(DoneLayout {
            local_done,
            elapsed_ms,
            agg_printed,
            root_go,
            exit_acks,
            barrier,
            levels,
            fan_in,
            alloc,
        })
    }

    pub(crate) fn segment_words(&self) -> usize {
        self.alloc.occupied()
    }

    pub(crate) fn group_done(&self, level: usize, gidx: usize) -> SymAddr {
        self.levels[level].done.offset(gidx)
    }

    pub(crate) fn group_leader(&self, level: usize, gidx: usize) -> SymAddr {
        self.levels[level].leader.offset(gidx)
    }

    pub(crate) fn group_arrivals(&self, level: usize, gidx: usize) -> SymAddr {
        self.levels[level].arrivals.offset(gidx)
    }
}

impl std::fmt::Display for DoneLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} words ", self.segment_words())?;
        write!(f, "{}", self.alloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn addresses_are_unique_and_in_bounds() {
        let topo = TreeTopology::new(11, 3, None).unwrap();
        let layout = DoneLayout::new(&topo, None).unwrap();
        let mut seen = HashSet::new();
        for addr in [
            layout.local_done,
            layout.elapsed_ms,
            layout.agg_printed,
            layout.root_go,
            layout.exit_acks,
        ] {
            assert!(seen.insert(addr));
        }
        for pe in 0..topo.num_pes() {
            assert!(seen.insert(layout.barrier.offset(pe)));
        }
        for level in 0..topo.num_levels() {
            for g in 0..topo.num_groups_at_level(level) {
                assert!(seen.insert(layout.group_done(level, g)));
                assert!(seen.insert(layout.group_leader(level, g)));
                assert!(seen.insert(layout.group_arrivals(level, g)));
            }
        }
        assert_eq!(seen.len(), layout.segment_words());
        assert!(seen.iter().all(|a| a.index() < layout.segment_words()));
    }

    #[test]
    fn leader_encoding() {
        assert_eq!(decode_leader(0), None);
        assert_eq!(decode_leader(encode_leader(0)), Some(0));
        assert_eq!(decode_leader(encode_leader(17)), Some(17));
    }

    #[test]
    fn fan_in_mailboxes_follow_the_tree_state() {
        let topo = TreeTopology::new(10, 2, None).unwrap();
        let star = StarTopology::new(10, 2, 2, None).unwrap();
        let plain = DoneLayout::new(&topo, None).unwrap();
        let layout = DoneLayout::new(&topo, Some(&star)).unwrap();
        let fan_in = layout.fan_in.as_ref().unwrap();
        assert_eq!(fan_in.gate.index(), plain.segment_words());
        let mut seen = HashSet::new();
        seen.insert(fan_in.gate);
        for level in 0..star.num_levels() {
            for g in 0..star.num_groups_at_level(level) {
                for slot in 0..star.slot_capacity(level) {
                    assert!(seen.insert(fan_in.child_slot(level, g, slot)));
                }
                assert!(seen.insert(fan_in.token(level, g)));
            }
        }
        assert_eq!(plain.segment_words() + seen.len(), layout.segment_words());
    }
}
