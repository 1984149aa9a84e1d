//! The static merge tree of PE groups.
//!
//! Level 0 partitions the PEs into contiguous leaf groups of `leaf_span` ranks
//! (the last one may be smaller). Each level above pairs adjacent groups of the
//! level below, so a group at level `L` covers `leaf_span * 2^L` ranks. The top
//! level always holds exactly one group.
//!
//! Everything here is a pure function of `(num_pes, leaf_span)`, every PE
//! computes the same tree without talking to anyone.

/// The PE that hosts the global coordination state and the top group
pub const ROOT_PE: usize = 0;

/// An error describing a tree that could never complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyError {
    /// a job needs at least one PE
    NoPes,
    /// leaf groups must cover at least one PE
    ZeroSpan,
    /// the configured level limit is reached while more than one group remains
    LevelLimit {
        max_levels: usize,
        groups_remaining: usize,
    },
    /// the tail leaf group would hold no PEs (or more than a full span)
    EmptyTailGroup { gidx: usize, size: isize },
    /// a (level, group) pair outside the tree
    InvalidGroup { level: usize, gidx: usize },
    /// a PE rank outside of `0..num_pes`
    InvalidPe { pe: usize },
    /// star groups above the leaves need at least two children
    BranchTooSmall { branch: usize },
    /// a star strategy was started without its fan-in tree
    MissingFanIn,
}

pub type TopologyResult<T> = Result<T, TopologyError>;

impl std::fmt::Display for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TopologyError::NoPes => write!(f, "a job needs at least one pe"),
            TopologyError::ZeroSpan => write!(f, "leaf group size must be at least 1"),
            TopologyError::LevelLimit {
                max_levels,
                groups_remaining,
            } => write!(
                f,
                "{} groups remain after the level limit of {} levels",
                groups_remaining, max_levels
            ),
            TopologyError::EmptyTailGroup { gidx, size } => {
                write!(f, "tail leaf group {} would have size {}", gidx, size)
            }
            TopologyError::InvalidGroup { level, gidx } => {
                write!(f, "no group {} at level {}", gidx, level)
            }
            TopologyError::InvalidPe { pe } => write!(f, "invalid pe {}", pe),
            TopologyError::BranchTooSmall { branch } => {
                write!(f, "star branch factor must be at least 2, got {}", branch)
            }
            TopologyError::MissingFanIn => write!(f, "no fan-in tree was built for a star strategy"),
        }
    }
}

impl std::error::Error for TopologyError {}

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeTopology {
    num_pes: usize,
    leaf_span: usize,
    groups_per_level: Vec<usize>,
}

impl TreeTopology {
    /// Build the tree for `num_pes` PEs with leaf groups of `leaf_span` PEs.
    ///
    /// `max_levels` bounds the height of the tree; a bound that leaves more than
    /// one group at the highest allowed level is rejected.
    pub fn new(
        num_pes: usize,
        leaf_span: usize,
        max_levels: Option<usize>,
    ) -> TopologyResult<TreeTopology> {
        if num_pes == 0 {
            return Err(TopologyError::NoPes);
        }
        if leaf_span == 0 {
            return Err(TopologyError::ZeroSpan);
        }

        let mut groups_per_level = Vec::new();
        let mut span = leaf_span;
        loop {
            let ng = ceil_div(num_pes, span);
            if let Some(max_levels) = max_levels {
                if groups_per_level.len() == max_levels {
                    return Err(TopologyError::LevelLimit {
                        max_levels,
                        groups_remaining: *groups_per_level.last().unwrap_or(&ng),
                    });
                }
            }
            groups_per_level.push(ng);
            if ng <= 1 {
                break;
            }
            span = span.saturating_mul(2);
        }

        let topology = TreeTopology {
            num_pes,
            leaf_span,
            groups_per_level,
        };
        let tail = topology.num_groups_at_level(0) - 1;
        topology.actual_size_of_leaf_group(tail)?;
        Ok(topology)
    }

    pub fn num_pes(&self) -> usize {
        self.num_pes
    }

    pub fn leaf_span(&self) -> usize {
        self.leaf_span
    }

    /// Number of levels including the top one
    pub fn num_levels(&self) -> usize {
        self.groups_per_level.len()
    }

    pub fn top_level(&self) -> usize {
        self.num_levels() - 1
    }

    pub fn num_groups_at_level(&self, level: usize) -> usize {
        self.groups_per_level.get(level).copied().unwrap_or(0)
    }

    /// Number of PE ranks a group at `level` can cover
    pub fn group_span_at_level(&self, level: usize) -> usize {
        self.leaf_span
            .saturating_mul(1usize.checked_shl(level as u32).unwrap_or(usize::MAX))
    }

    pub fn leaf_group_index(&self, pe: usize) -> usize {
        pe / self.leaf_span
    }

    /// The group at `level` that covers `pe`
    pub fn group_index(&self, level: usize, pe: usize) -> usize {
        pe / self.group_span_at_level(level)
    }

    pub fn actual_size_of_leaf_group(&self, gidx: usize) -> TopologyResult<usize> {
        let num_leaves = self.num_groups_at_level(0);
        if gidx >= num_leaves {
            return Err(TopologyError::InvalidGroup { level: 0, gidx });
        }
        if gidx + 1 < num_leaves {
            return Ok(self.leaf_span);
        }
        let size = self.num_pes as isize - (gidx * self.leaf_span) as isize;
        if size < 1 || size > self.leaf_span as isize {
            return Err(TopologyError::EmptyTailGroup { gidx, size });
        }
        Ok(size as usize)
    }

    /// The PE hosting the state of group `(level, gidx)`: the lowest rank it covers.
    pub fn static_group_owner_pe(&self, level: usize, gidx: usize) -> usize {
        gidx * self.group_span_at_level(level)
    }

    /// Children expected to complete before group `(level, gidx)` does; `level` must be above the leaves.
    pub fn expected_children(&self, level: usize, gidx: usize) -> TopologyResult<usize> {
        self.check_group(level, gidx)?;
        if level == 0 {
            return Err(TopologyError::InvalidGroup { level, gidx });
        }
        let right_child = gidx * 2 + 1;
        if right_child < self.num_groups_at_level(level - 1) {
            Ok(2)
        } else {
            Ok(1)
        }
    }

    /// Arrivals that complete group `(level, gidx)`: PEs for leaves, children above.
    pub fn expected_arrivals(&self, level: usize, gidx: usize) -> TopologyResult<usize> {
        self.check_group(level, gidx)?;
        if level == 0 {
            self.actual_size_of_leaf_group(gidx)
        } else {
            self.expected_children(level, gidx)
        }
    }

    /// The parent of group `(level, gidx)`, `None` at the top
    pub fn parent(&self, level: usize, gidx: usize) -> Option<(usize, usize)> {
        if level + 1 < self.num_levels() {
            Some((level + 1, gidx / 2))
        } else {
            None
        }
    }

    pub fn check_group(&self, level: usize, gidx: usize) -> TopologyResult<()> {
        if gidx < self.num_groups_at_level(level) {
            Ok(())
        } else {
            Err(TopologyError::InvalidGroup { level, gidx })
        }
    }

    pub fn check_pe(&self, pe: usize) -> TopologyResult<()> {
        if pe < self.num_pes {
            Ok(())
        } else {
            Err(TopologyError::InvalidPe { pe })
        }
    }
}

impl std::fmt::Display for TreeTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(
            f,
            "npes={}, leaf_group_size={}, levels={}",
            self.num_pes,
            self.leaf_span,
            self.num_levels()
        )?;
        for (level, ng) in self.groups_per_level.iter().enumerate() {
            writeln!(
                f,
                " level {}: num_groups={}, span={}",
                level,
                ng,
                self.group_span_at_level(level)
            )?;
        }
        Ok(())
    }
}

/// The fan-in tree used by the star strategies.
///
/// Level 0 is the same leaf partition as [`TreeTopology`]. Each level above
/// gathers up to `branch` groups of the level below, so a group at level `L`
/// covers `leaf_span * branch^L` ranks. Every group has one slot per child at its
/// owner (members at level 0, child groups above). A flat star is the special
/// case where a single level above the leaves gathers every leaf group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarTopology {
    num_pes: usize,
    leaf_span: usize,
    branch: usize,
    groups_per_level: Vec<usize>,
}

impl StarTopology {
    pub fn new(
        num_pes: usize,
        leaf_span: usize,
        branch: usize,
        max_levels: Option<usize>,
    ) -> TopologyResult<StarTopology> {
        if num_pes == 0 {
            return Err(TopologyError::NoPes);
        }
        if leaf_span == 0 {
            return Err(TopologyError::ZeroSpan);
        }
        if branch < 2 {
            return Err(TopologyError::BranchTooSmall { branch });
        }
        let mut groups_per_level = vec![ceil_div(num_pes, leaf_span)];
        while let Some(&ng) = groups_per_level.last() {
            if ng <= 1 {
                break;
            }
            if let Some(max_levels) = max_levels {
                if groups_per_level.len() == max_levels {
                    return Err(TopologyError::LevelLimit {
                        max_levels,
                        groups_remaining: ng,
                    });
                }
            }
            groups_per_level.push(ceil_div(ng, branch));
        }
        Ok(StarTopology {
            num_pes,
            leaf_span,
            branch,
            groups_per_level,
        })
    }

    /// A single level above the leaves whose root gathers every leaf group
    pub fn flat(num_pes: usize, leaf_span: usize) -> TopologyResult<StarTopology> {
        if leaf_span == 0 {
            return Err(TopologyError::ZeroSpan);
        }
        let branch = ceil_div(num_pes.max(1), leaf_span).max(2);
        StarTopology::new(num_pes, leaf_span, branch, None)
    }

    pub fn num_pes(&self) -> usize {
        self.num_pes
    }

    pub fn branch(&self) -> usize {
        self.branch
    }

    pub fn num_levels(&self) -> usize {
        self.groups_per_level.len()
    }

    pub fn top_level(&self) -> usize {
        self.num_levels() - 1
    }

    pub fn num_groups_at_level(&self, level: usize) -> usize {
        self.groups_per_level.get(level).copied().unwrap_or(0)
    }

    pub fn group_span_at_level(&self, level: usize) -> usize {
        let mut span = self.leaf_span;
        for _ in 0..level {
            span = span.saturating_mul(self.branch);
        }
        span
    }

    /// The group at `level` that covers `pe`
    pub fn group_index(&self, level: usize, pe: usize) -> usize {
        pe / self.group_span_at_level(level)
    }

    pub fn static_group_owner_pe(&self, level: usize, gidx: usize) -> usize {
        gidx * self.group_span_at_level(level)
    }

    /// Slots reserved per group at `level`
    pub fn slot_capacity(&self, level: usize) -> usize {
        if level == 0 {
            self.leaf_span
        } else {
            self.branch
        }
    }

    /// Children that must report before group `(level, gidx)` is complete
    pub fn num_children(&self, level: usize, gidx: usize) -> TopologyResult<usize> {
        if gidx >= self.num_groups_at_level(level) {
            return Err(TopologyError::InvalidGroup { level, gidx });
        }
        let (below, cap) = if level == 0 {
            (self.num_pes, self.leaf_span)
        } else {
            (self.num_groups_at_level(level - 1), self.branch)
        };
        let first = gidx * cap;
        Ok((below - first).min(cap))
    }

    /// The first child of group `(level, gidx)`: a PE at level 0, a group index above
    pub fn first_child(&self, level: usize, gidx: usize) -> usize {
        gidx * self.slot_capacity(level)
    }

    /// `(parent_level, parent_gidx, slot)` for group `(level, gidx)`, `None` at the top
    pub fn parent_slot(&self, level: usize, gidx: usize) -> Option<(usize, usize, usize)> {
        if level + 1 < self.num_levels() {
            Some((level + 1, gidx / self.branch, gidx % self.branch))
        } else {
            None
        }
    }
}

impl std::fmt::Display for StarTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(
            f,
            "npes={}, leaf_size={}, K={}, levels={}",
            self.num_pes,
            self.leaf_span,
            self.branch,
            self.num_levels()
        )?;
        for (level, ng) in self.groups_per_level.iter().enumerate() {
            writeln!(
                f,
                " level {}: num_groups={}, span={}",
                level,
                ng,
                self.group_span_at_level(level)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pe_is_its_own_tree() {
        let topo = TreeTopology::new(1, 8, None).unwrap();
        assert_eq!(topo.num_levels(), 1);
        assert_eq!(topo.top_level(), 0);
        assert_eq!(topo.actual_size_of_leaf_group(0), Ok(1));
        assert_eq!(topo.static_group_owner_pe(0, 0), ROOT_PE);
        assert_eq!(topo.parent(0, 0), None);
    }

    #[test]
    fn five_pes_span_two() {
        let topo = TreeTopology::new(5, 2, None).unwrap();
        assert_eq!(topo.num_levels(), 3);
        assert_eq!(topo.num_groups_at_level(0), 3);
        assert_eq!(topo.num_groups_at_level(1), 2);
        assert_eq!(topo.num_groups_at_level(2), 1);
        let sizes: Vec<usize> = (0..3)
            .map(|g| topo.actual_size_of_leaf_group(g).unwrap())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(topo.expected_children(1, 0), Ok(2));
        assert_eq!(topo.expected_children(1, 1), Ok(1));
        assert_eq!(topo.expected_children(2, 0), Ok(2));
        assert_eq!(topo.parent(0, 2), Some((1, 1)));
        assert_eq!(topo.static_group_owner_pe(1, 1), 4);
        assert_eq!(topo.static_group_owner_pe(2, 0), ROOT_PE);
    }

    #[test]
    fn tail_group_sizes() {
        for num_pes in 1..64 {
            for span in 1..10 {
                let topo = TreeTopology::new(num_pes, span, None).unwrap();
                let tail = topo.num_groups_at_level(0) - 1;
                let expected = if num_pes % span == 0 {
                    span
                } else {
                    num_pes % span
                };
                assert_eq!(topo.actual_size_of_leaf_group(tail), Ok(expected));
                let total: usize = (0..=tail)
                    .map(|g| topo.actual_size_of_leaf_group(g).unwrap())
                    .sum();
                assert_eq!(total, num_pes);
            }
        }
    }

    #[test]
    fn lone_children_expect_one() {
        for num_pes in 1..100 {
            let topo = TreeTopology::new(num_pes, 3, None).unwrap();
            assert_eq!(topo.num_groups_at_level(topo.top_level()), 1);
            for level in 1..topo.num_levels() {
                let below = topo.num_groups_at_level(level - 1);
                assert_eq!(topo.num_groups_at_level(level), (below + 1) / 2);
                let total: usize = (0..topo.num_groups_at_level(level))
                    .map(|g| topo.expected_children(level, g).unwrap())
                    .sum();
                assert_eq!(total, below);
                if below % 2 == 1 {
                    let lone = topo.num_groups_at_level(level) - 1;
                    assert_eq!(topo.expected_children(level, lone), Ok(1));
                }
            }
        }
    }

    #[test]
    fn owners_are_covered_and_distinct() {
        let topo = TreeTopology::new(37, 4, None).unwrap();
        for level in 0..topo.num_levels() {
            let owners: Vec<usize> = (0..topo.num_groups_at_level(level))
                .map(|g| topo.static_group_owner_pe(level, g))
                .collect();
            for (g, owner) in owners.iter().enumerate() {
                assert!(*owner < topo.num_pes());
                assert_eq!(topo.group_index(level, *owner), g);
            }
            let mut dedup = owners.clone();
            dedup.dedup();
            assert_eq!(dedup, owners);
        }
    }

    #[test]
    fn rejects_bad_configs() {
        assert_eq!(TreeTopology::new(0, 4, None), Err(TopologyError::NoPes));
        assert_eq!(TreeTopology::new(4, 0, None), Err(TopologyError::ZeroSpan));
        assert_eq!(
            TreeTopology::new(16, 2, Some(2)),
            Err(TopologyError::LevelLimit {
                max_levels: 2,
                groups_remaining: 4
            })
        );
        assert!(TreeTopology::new(16, 2, Some(4)).is_ok());
        assert!(TreeTopology::new(16, 2, Some(10)).is_ok());
        let topo = TreeTopology::new(5, 2, None).unwrap();
        assert_eq!(
            topo.actual_size_of_leaf_group(3),
            Err(TopologyError::InvalidGroup { level: 0, gidx: 3 })
        );
        assert!(topo.expected_children(0, 0).is_err());
    }

    #[test]
    fn star_children_cover_the_level_below() {
        for num_pes in 1..80 {
            for leaf_span in 1..6 {
                for branch in 2..5 {
                    let topo = StarTopology::new(num_pes, leaf_span, branch, None).unwrap();
                    assert_eq!(topo.num_groups_at_level(topo.top_level()), 1);
                    let leaves: usize = (0..topo.num_groups_at_level(0))
                        .map(|g| topo.num_children(0, g).unwrap())
                        .sum();
                    assert_eq!(leaves, num_pes);
                    for level in 1..topo.num_levels() {
                        let total: usize = (0..topo.num_groups_at_level(level))
                            .map(|g| topo.num_children(level, g).unwrap())
                            .sum();
                        assert_eq!(total, topo.num_groups_at_level(level - 1));
                    }
                    for level in 0..topo.num_levels() {
                        for g in 0..topo.num_groups_at_level(level) {
                            let owner = topo.static_group_owner_pe(level, g);
                            assert!(owner < num_pes);
                            assert_eq!(topo.group_index(level, owner), g);
                            if let Some((pl, pg, slot)) = topo.parent_slot(level, g) {
                                assert!(slot < topo.slot_capacity(pl));
                                assert_eq!(topo.first_child(pl, pg) + slot, g);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn flat_star_has_one_gathering_level() {
        let topo = StarTopology::flat(20, 4).unwrap();
        assert_eq!(topo.num_levels(), 2);
        assert_eq!(topo.num_groups_at_level(0), 5);
        assert_eq!(topo.num_children(1, 0), Ok(5));
        assert_eq!(topo.num_children(0, 4), Ok(4));
        let single = StarTopology::flat(3, 8).unwrap();
        assert_eq!(single.num_levels(), 1);
        assert_eq!(single.num_children(0, 0), Ok(3));
    }

    #[test]
    fn hstar_levels() {
        let topo = StarTopology::new(100, 4, 3, None).unwrap();
        let groups: Vec<usize> = (0..topo.num_levels())
            .map(|l| topo.num_groups_at_level(l))
            .collect();
        assert_eq!(groups, vec![25, 9, 3, 1]);
        assert_eq!(topo.static_group_owner_pe(2, 1), 36);
        assert_eq!(topo.num_children(1, 8), Ok(1));
        assert_eq!(
            StarTopology::new(100, 4, 1, None),
            Err(TopologyError::BranchTooSmall { branch: 1 })
        );
        assert_eq!(
            StarTopology::new(100, 4, 3, Some(2)),
            Err(TopologyError::LevelLimit {
                max_levels: 2,
                groups_remaining: 9
            })
        );
    }
}
