use super::{DoneContext, Role, Strategy, Termination};
use crate::backoff::{spin_until, DeadlockWatch};
use crate::barrier::Barrier;
use crate::error::{DoneError, DoneResult};
use crate::lamellae::{CommProgress, CommRdma, CommShutdown, SymAddr};
use crate::layout::FanInAddrs;
use crate::topology::{StarTopology, TopologyError, ROOT_PE};

use tracing::{debug, info, trace};

impl DoneContext {
    pub(super) fn fan_in(&self) -> DoneResult<(&StarTopology, &FanInAddrs)> {
        match (&self.star, &self.layout.fan_in) {
            (Some(star), Some(fan_in)) => Ok((star, fan_in)),
            _ => Err(TopologyError::MissingFanIn.into()),
        }
    }

    /// Set by the root once every PE has reported
    pub(super) fn star_released(&self) -> DoneResult<bool> {
        let (star, fan_in) = self.fan_in()?;
        Ok(self.comm.get(ROOT_PE, fan_in.token(star.top_level(), 0))? != 0)
    }

    fn wait_local(&self, addr: SymAddr, what: &'static str) -> DoneResult<u64> {
        let mut watch = DeadlockWatch::new(self.deadlock_timeout, what);
        spin_until(&self.backoff, &mut watch, self.my_pe, || {
            Ok::<_, DoneError>(self.comm.get(self.my_pe, addr)? != 0)
        })
    }

    /// Report this PE to its leaf owner. Then, for every group this PE owns
    /// from the leaves up, wait for all of its children and report the group
    /// to its parent's owner. On the root this returns once everyone reported.
    pub(crate) fn star_fan_in(&self) -> DoneResult<u64> {
        let (star, fan_in) = self.fan_in()?;
        let leaf = star.group_index(0, self.my_pe);
        let slot = self.my_pe - star.first_child(0, leaf);
        self.comm.put(
            star.static_group_owner_pe(0, leaf),
            fan_in.child_slot(0, leaf, slot),
            1,
        )?;
        self.comm.quiet();

        let mut polls = 0;
        for level in 0..star.num_levels() {
            let gidx = star.group_index(level, self.my_pe);
            if star.static_group_owner_pe(level, gidx) != self.my_pe {
                break;
            }
            for slot in 0..star.num_children(level, gidx)? {
                polls += self.wait_local(
                    fan_in.child_slot(level, gidx, slot),
                    "waiting for children to report",
                )?;
            }
            trace!(
                "pe {} collected group {} at level {}",
                self.my_pe,
                gidx,
                level
            );
            if let Some((parent_level, parent_gidx, slot)) = star.parent_slot(level, gidx) {
                self.comm.put(
                    star.static_group_owner_pe(parent_level, parent_gidx),
                    fan_in.child_slot(parent_level, parent_gidx, slot),
                    1,
                )?;
                self.comm.quiet();
            }
        }
        Ok(polls)
    }

    /// Open the termination gate of every PE. The flat star releases them
    /// straight from the root, the hierarchical one forwards a token from
    /// owner to owner back down the fan-in tree.
    pub(crate) fn star_release(&self) -> DoneResult<u64> {
        let (star, fan_in) = self.fan_in()?;
        if self.my_pe == ROOT_PE {
            self.comm.put(ROOT_PE, fan_in.token(star.top_level(), 0), 1)?;
            if self.strategy == Strategy::Star {
                for pe in 0..star.num_pes() {
                    self.comm.put(pe, fan_in.gate, 1)?;
                }
            }
            self.comm.quiet();
        }

        let mut polls = 0;
        if self.strategy == Strategy::HStar {
            for level in (0..star.num_levels()).rev() {
                let gidx = star.group_index(level, self.my_pe);
                if star.static_group_owner_pe(level, gidx) != self.my_pe {
                    continue;
                }
                polls += self.wait_local(fan_in.token(level, gidx), "waiting for the release token")?;
                let first = star.first_child(level, gidx);
                for child in first..first + star.num_children(level, gidx)? {
                    if level > 0 {
                        self.comm.put(
                            star.static_group_owner_pe(level - 1, child),
                            fan_in.token(level - 1, child),
                            1,
                        )?;
                    } else {
                        self.comm.put(child, fan_in.gate, 1)?;
                    }
                }
                self.comm.quiet();
            }
        }
        polls += self.wait_local(fan_in.gate, "waiting for the termination gate")?;
        Ok(polls)
    }

    /// Fan in, report on the root, release, then meet every PE in a final barrier and exit.
    pub(crate) fn drive_star(&self, barrier: &Barrier) -> DoneResult<Termination> {
        let mut polls = self.star_fan_in()?;
        let report = if self.my_pe == ROOT_PE {
            self.announce_report()?
        } else {
            None
        };
        polls += self.star_release()?;
        barrier.barrier()?;

        let role = if self.my_pe == ROOT_PE {
            let num_pes = self.topology.num_pes();
            println!(
                "ALL_CLEAR: all {} PEs observed termination and reached the final barrier.",
                num_pes
            );
            info!("all {} pes reached the final barrier", num_pes);
            Role::Root
        } else {
            Role::NonRoot
        };
        debug!("pe {} leaving the {:?} protocol", self.my_pe, self.strategy);
        self.comm.quiet();
        self.comm.global_exit(0);
        Ok(Termination {
            pe: self.my_pe,
            role,
            report,
            polls,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::global_done::tests::local_contexts;
    use crate::global_done::Strategy;
    use crate::lamellae::CommRdma;
    use crate::topology::ROOT_PE;

    #[test]
    fn hstar_gates_open_only_after_every_report() {
        let num_pes = 7;
        let (_fabric, ctxs) = local_contexts(num_pes, 2, Strategy::HStar);
        let late = 5;
        std::thread::scope(|s| {
            for ctx in ctxs.iter().filter(|c| c.my_pe != late) {
                s.spawn(move || {
                    ctx.star_fan_in().unwrap();
                    ctx.star_release().unwrap();
                });
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            let (_, fan_in) = ctxs[0].fan_in().unwrap();
            for pe in 0..num_pes {
                assert_eq!(ctxs[0].comm.get(pe, fan_in.gate).unwrap(), 0);
            }
            assert!(!ctxs[ROOT_PE].star_released().unwrap());
            ctxs[late].star_fan_in().unwrap();
            ctxs[late].star_release().unwrap();
        });
        let (_, fan_in) = ctxs[0].fan_in().unwrap();
        for pe in 0..num_pes {
            assert_eq!(ctxs[0].comm.get(pe, fan_in.gate).unwrap(), 1);
        }
        assert!(ctxs[ROOT_PE].star_released().unwrap());
    }

    #[test]
    fn flat_star_root_opens_every_gate() {
        let (_fabric, ctxs) = local_contexts(6, 4, Strategy::Star);
        std::thread::scope(|s| {
            for ctx in &ctxs {
                s.spawn(move || {
                    ctx.star_fan_in().unwrap();
                    ctx.star_release().unwrap();
                });
            }
        });
        let (star, fan_in) = ctxs[0].fan_in().unwrap();
        assert_eq!(star.num_levels(), 2);
        for slot in 0..2 {
            assert_eq!(
                ctxs[0].comm.get(0, fan_in.child_slot(1, 0, slot)).unwrap(),
                1
            );
        }
        assert_eq!(ctxs[0].comm.get(4, fan_in.child_slot(0, 1, 1)).unwrap(), 1);
    }
}
