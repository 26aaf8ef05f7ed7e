//! # Forward Dataflow Engine
//!
//! A generic forward fixed-point engine over a closure version's CFG.
//!
//! The engine threads an abstract state through every instruction of every
//! reachable block, merging at join points, until nothing changes. The
//! lattice's finite height bounds the iteration, so no explicit cap is
//! needed. Per-block entry snapshots are retained; per-instruction states
//! are recomputed on demand by replaying the block's transfer function,
//! which keeps memory proportional to the block count.
//!
//! Two merge operators drive convergence: [`AbstractDomain::merge`] at
//! ordinary joins, and [`AbstractDomain::merge_exit`] when folding the
//! states observed at closure exits into one result.

use tracing::trace;

use crate::ir::{BlockId, ClosureVersion, Cfg, EdgeMode, InstrId};

/// How much an abstract operation changed the state, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AbstractResult {
    /// Nothing changed.
    #[default]
    None,
    /// The state changed.
    Updated,
    /// The state changed by discarding certainty it previously held.
    LostPrecision,
    /// The state changed in a way no operand accounts for; the converged
    /// result carries a sticky taint marker.
    Tainted,
}

impl AbstractResult {
    /// Join two results, keeping the more severe one.
    pub fn max(self, other: AbstractResult) -> AbstractResult {
        std::cmp::max(self, other)
    }

    /// Whether the state changed at all.
    pub fn changed(self) -> bool {
        self != AbstractResult::None
    }

    /// Whether this result taints the converged analysis.
    pub fn tainted(self) -> bool {
        self == AbstractResult::Tainted
    }
}

/// An abstract state that can be merged at control-flow joins.
///
/// Both merges must be monotone: results only ever lose precision, and
/// merging a state with itself must change nothing.
pub trait AbstractDomain: Clone + Default {
    /// Join at a control-flow merge with further code downstream.
    fn merge(&mut self, other: &Self) -> AbstractResult;

    /// Join at a closure exit, where no further code observes the result.
    /// May be more permissive than [`merge`](AbstractDomain::merge).
    fn merge_exit(&mut self, other: &Self) -> AbstractResult;
}

/// The per-instruction transfer function of an analysis.
pub trait TransferFunction {
    type Domain: AbstractDomain;

    /// Apply one instruction to the state, reporting what changed.
    fn apply(
        &self,
        cv: &ClosureVersion,
        instr: InstrId,
        state: &mut Self::Domain,
    ) -> AbstractResult;
}

/// A converged analysis over one closure version.
#[derive(Debug)]
pub struct Converged<D> {
    entry_states: Vec<Option<D>>,
    exit: D,
    tainted: bool,
}

/// Run `transfer` to convergence over the subgraph rooted at `entry`.
pub fn run<T: TransferFunction>(
    cv: &ClosureVersion,
    entry: BlockId,
    transfer: &T,
    mode: EdgeMode,
) -> Converged<T::Domain> {
    let cfg = Cfg::new(cv, entry, mode);
    let mut entry_states: Vec<Option<T::Domain>> = vec![None; cv.blocks.len()];
    entry_states[entry.index()] = Some(T::Domain::default());
    let mut tainted = false;
    let mut iterations = 0usize;

    loop {
        iterations += 1;
        let mut changed = false;
        for &bb in cfg.rpo() {
            let Some(start) = entry_states[bb.index()].as_ref() else {
                continue;
            };
            let mut state = start.clone();
            for &i in &cv.block(bb).instrs {
                let res = transfer.apply(cv, i, &mut state);
                tainted |= res.tainted();
            }
            let term = cv
                .block(bb)
                .terminator
                .as_ref()
                .expect("dataflow over an unterminated block");
            for succ in mode.successors(term) {
                let slot = &mut entry_states[succ.index()];
                match slot {
                    None => {
                        *slot = Some(state.clone());
                        changed = true;
                    }
                    Some(existing) => {
                        let res = existing.merge(&state);
                        tainted |= res.tainted();
                        changed |= res.changed();
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    trace!(iterations, "dataflow converged");

    // Fold the states observed at exits into one result, seeded with the
    // first exit so an empty default never truncates real knowledge.
    let mut exit: Option<T::Domain> = None;
    for &bb in cfg.rpo() {
        let term = cv
            .block(bb)
            .terminator
            .as_ref()
            .expect("dataflow over an unterminated block");
        if !term.is_exit() {
            continue;
        }
        let Some(start) = entry_states[bb.index()].as_ref() else {
            continue;
        };
        let mut state = start.clone();
        for &i in &cv.block(bb).instrs {
            transfer.apply(cv, i, &mut state);
        }
        match &mut exit {
            None => exit = Some(state),
            Some(e) => {
                let res = e.merge_exit(&state);
                tainted |= res.tainted();
            }
        }
    }

    Converged {
        entry_states,
        exit: exit.unwrap_or_default(),
        tainted,
    }
}

impl<D: AbstractDomain> Converged<D> {
    /// Whether the block was ever reached.
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.entry_states
            .get(block.index())
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    /// The merged state over all closure exits.
    pub fn exit(&self) -> &D {
        &self.exit
    }

    /// Whether convergence lost precision through untracked side effects.
    pub fn tainted(&self) -> bool {
        self.tainted
    }

    /// The state immediately before the instruction at `(block, idx)`.
    pub fn before<T: TransferFunction<Domain = D>>(
        &self,
        cv: &ClosureVersion,
        transfer: &T,
        block: BlockId,
        idx: usize,
    ) -> D {
        self.state_at(cv, transfer, block, idx, false)
    }

    /// The state immediately after the instruction at `(block, idx)`.
    pub fn after<T: TransferFunction<Domain = D>>(
        &self,
        cv: &ClosureVersion,
        transfer: &T,
        block: BlockId,
        idx: usize,
    ) -> D {
        self.state_at(cv, transfer, block, idx, true)
    }

    fn state_at<T: TransferFunction<Domain = D>>(
        &self,
        cv: &ClosureVersion,
        transfer: &T,
        block: BlockId,
        idx: usize,
        include: bool,
    ) -> D {
        let mut state = self.entry_states[block.index()]
            .clone()
            .expect("state query on an unreachable block");
        for (i, &id) in cv.block(block).instrs.iter().enumerate() {
            if i == idx && !include {
                break;
            }
            transfer.apply(cv, id, &mut state);
            if i == idx {
                break;
            }
        }
        state
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstrKind, Terminator, Ty};

    /// Counts how many constants were executed on the longest path so far.
    #[derive(Debug, Clone, Default, PartialEq)]
    struct Count(u32);

    impl AbstractDomain for Count {
        fn merge(&mut self, other: &Self) -> AbstractResult {
            if other.0 > self.0 {
                self.0 = other.0;
                AbstractResult::Updated
            } else {
                AbstractResult::None
            }
        }
        fn merge_exit(&mut self, other: &Self) -> AbstractResult {
            self.merge(other)
        }
    }

    struct CountConsts;

    impl TransferFunction for CountConsts {
        type Domain = Count;
        fn apply(
            &self,
            cv: &ClosureVersion,
            instr: InstrId,
            state: &mut Count,
        ) -> AbstractResult {
            if matches!(cv.instr(instr).kind, InstrKind::Const { .. }) {
                state.0 += 1;
                AbstractResult::Updated
            } else {
                AbstractResult::None
            }
        }
    }

    #[test]
    fn test_linear_before_after() {
        let mut cv = ClosureVersion::new("f", 0);
        let entry = cv.entry;
        cv.push(entry, InstrKind::Const { value: 1 }, Ty::Value);
        cv.push(entry, InstrKind::LdFunctionEnv, Ty::Env);
        let c = cv.push(entry, InstrKind::Const { value: 2 }, Ty::Value);
        cv.set_terminator(entry, Terminator::Return { value: c });

        let conv = run(&cv, entry, &CountConsts, EdgeMode::Full);
        assert_eq!(conv.before(&cv, &CountConsts, entry, 0), Count(0));
        assert_eq!(conv.after(&cv, &CountConsts, entry, 0), Count(1));
        assert_eq!(conv.before(&cv, &CountConsts, entry, 2), Count(1));
        assert_eq!(conv.after(&cv, &CountConsts, entry, 2), Count(2));
        assert_eq!(conv.exit(), &Count(2));
        assert!(!conv.tainted());
    }

    #[test]
    fn test_merge_at_join_takes_max() {
        let mut cv = ClosureVersion::new("f", 0);
        let entry = cv.entry;
        let cond = cv.push(entry, InstrKind::Const { value: 1 }, Ty::Value);
        let left = cv.new_block();
        let right = cv.new_block();
        let join = cv.new_block();
        cv.set_terminator(
            entry,
            Terminator::Branch {
                cond,
                on_true: left,
                on_false: right,
            },
        );
        cv.push(left, InstrKind::Const { value: 2 }, Ty::Value);
        cv.push(left, InstrKind::Const { value: 3 }, Ty::Value);
        cv.set_terminator(left, Terminator::Goto { target: join });
        cv.set_terminator(right, Terminator::Goto { target: join });
        cv.set_terminator(join, Terminator::Return { value: cond });

        let conv = run(&cv, entry, &CountConsts, EdgeMode::Full);
        // Longest path through the left arm carries three constants.
        assert_eq!(conv.before(&cv, &CountConsts, join, 0), Count(3));
    }

    #[test]
    fn test_mainline_skips_deopt_branch() {
        let mut cv = ClosureVersion::new("f", 0);
        let entry = cv.entry;
        let cond = cv.push(entry, InstrKind::Const { value: 1 }, Ty::Value);
        let next = cv.new_block();
        let bail = cv.new_block();
        cv.set_terminator(
            entry,
            Terminator::Guard {
                cond,
                next,
                deopt: bail,
            },
        );
        cv.set_terminator(next, Terminator::Return { value: cond });
        cv.set_terminator(bail, Terminator::Deopt);

        let conv = run(&cv, entry, &CountConsts, EdgeMode::Mainline);
        assert!(conv.is_reachable(next));
        assert!(!conv.is_reachable(bail));
    }
}
