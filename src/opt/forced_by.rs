//! # Force Tracking State
//!
//! The abstract state of the force dominance analysis. For every value
//! that may represent a deferred computation it tracks whether and by
//! which instruction it has been forced, which values have escaped local
//! reasoning, and the order in which parameter promises were forced.
//!
//! Forced knowledge is monotone within one state: once recorded, it only
//! ever widens from a specific instruction toward [`Forced::Ambiguous`],
//! never back.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::analysis::dataflow::{AbstractDomain, AbstractResult};
use crate::analysis::query::PromiseQuery;
use crate::ir::{ClosureVersion, InstrId, InstrKind, ValueId};

/// What is known about how a value was forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forced {
    /// Forced by a single known instruction on every path observed so far.
    By(InstrId),
    /// Forced by more than one distinct instruction depending on path, or
    /// by an untracked side effect.
    Ambiguous,
}

/// Whether a promise may be inlined at its dominating force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseInlineable {
    SafeToInline,
    /// Inlining is safe, but an escaped handle may still be read
    /// elsewhere and must be told the value is now evaluated.
    SafeToInlineWithUpdate,
    NotSafeToInline,
}

/// Per-program-point force knowledge.
#[derive(Debug, Clone, Default)]
pub struct ForcedBy {
    /// Force knowledge per value; absence means nothing is known.
    pub forced_by: HashMap<ValueId, Forced>,
    /// Values declared as promise-producing in the local scope.
    pub in_scope: HashSet<ValueId>,
    /// Values observed as an operand without having been forced.
    pub escaped: HashSet<ValueId>,
    /// Parameter indices in the order their promises were forced.
    pub argument_force_order: Vec<usize>,
    /// The recorded order can no longer be trusted.
    pub ambiguous_force_order: bool,
}

impl ForcedBy {
    /// Mark `v` as a fresh local promise binding, clearing anything
    /// previously known about it.
    pub fn declare(&mut self, v: ValueId) -> bool {
        let mut changed = self.in_scope.insert(v);
        changed |= self.forced_by.remove(&v).is_some();
        changed |= self.escaped.remove(&v);
        changed
    }

    /// Record that `v` is forced by `force`, unless a force is already
    /// known.
    pub fn forced_at(&mut self, v: ValueId, force: InstrId) -> bool {
        if self.forced_by.contains_key(&v) {
            return false;
        }
        self.forced_by.insert(v, Forced::By(force));
        true
    }

    /// Mark `v` as observed without being forced. No-op when `v` is
    /// already known forced.
    pub fn escape(&mut self, v: ValueId) -> bool {
        if self.forced_by.contains_key(&v) || self.escaped.contains(&v) {
            return false;
        }
        self.escaped.insert(v);
        true
    }

    /// An instruction that can force promises as a side effect ran: every
    /// escaped value not yet known forced must be assumed forced by it.
    pub fn sideeffect(&mut self) -> bool {
        let mut changed = false;
        for &e in &self.escaped {
            if !self.forced_by.contains_key(&e) {
                self.forced_by.insert(e, Forced::Ambiguous);
                changed = true;
            }
        }
        changed
    }

    /// Whether the parameter at `index` may already have been forced.
    pub fn maybe_forced(&self, index: usize) -> bool {
        self.argument_force_order.iter().any(|&i| i == index) || self.ambiguous_force_order
    }

    /// Whether the closure forces all of its parameters in declaration
    /// order with no ambiguity, making eager call-site evaluation
    /// behaviorally equivalent.
    pub fn eager_like_function(&self, cv: &ClosureVersion) -> bool {
        if self.ambiguous_force_order || self.argument_force_order.len() < cv.param_count {
            return false;
        }
        (0..cv.param_count).all(|i| self.argument_force_order[i] == i)
    }

    /// The unique instruction known to force `f`'s target, if any.
    pub fn get_dominating_force(&self, f: InstrId, cv: &ClosureVersion) -> Option<InstrId> {
        let target = cv.unwrap_promise(f);
        match self.forced_by.get(&target) {
            Some(Forced::By(g)) => Some(*g),
            _ => None,
        }
    }

    /// Whether `f` is the first and only force of its target on every
    /// path reaching it.
    pub fn is_dominating_force(&self, f: InstrId, cv: &ClosureVersion) -> bool {
        self.get_dominating_force(f, cv) == Some(f)
    }

    /// Whether the promise behind `mk` may be inlined at its dominating
    /// force, and whether an update companion is required.
    pub fn is_safe_to_inline(
        &self,
        mk: InstrId,
        cv: &ClosureVersion,
        query: &mut PromiseQuery,
    ) -> PromiseInlineable {
        let promise = match &cv.instr(mk).kind {
            InstrKind::MkArg { promise, .. } => *promise,
            other => panic!("inline query on non-promise instruction {mk}: {other:?}"),
        };
        // A promise that can leave compiled code cannot be inlined; we
        // would have to synthesize its call frame for the exit path.
        if query.can_trigger_deopt(cv, promise) {
            return PromiseInlineable::NotSafeToInline;
        }
        if self.escaped.contains(&mk) {
            PromiseInlineable::SafeToInlineWithUpdate
        } else {
            PromiseInlineable::SafeToInline
        }
    }
}

impl AbstractDomain for ForcedBy {
    /// Join at a control-flow merge. When one branch forced a value the
    /// other merely has in scope, downstream code cannot tell which branch
    /// ran, so the knowledge degrades to ambiguous.
    fn merge(&mut self, other: &Self) -> AbstractResult {
        let mut res = AbstractResult::None;

        for (v, f) in self.forced_by.iter_mut() {
            if !other.forced_by.contains_key(v)
                && other.in_scope.contains(v)
                && *f != Forced::Ambiguous
            {
                *f = Forced::Ambiguous;
                res = res.max(AbstractResult::LostPrecision);
            }
        }
        let newly_ambiguous: Vec<ValueId> = other
            .forced_by
            .keys()
            .copied()
            .filter(|v| !self.forced_by.contains_key(v) && self.in_scope.contains(v))
            .collect();
        for v in newly_ambiguous {
            self.forced_by.insert(v, Forced::Ambiguous);
            res = res.max(AbstractResult::LostPrecision);
        }

        res.max(self.merge_exit(other))
    }

    /// Join at a closure exit. Only disagreement on *who* forced a value
    /// loses precision; absent knowledge simply adopts the other side's.
    fn merge_exit(&mut self, other: &Self) -> AbstractResult {
        let mut res = AbstractResult::None;

        for (v, f) in self.forced_by.iter_mut() {
            if let Some(of) = other.forced_by.get(v) {
                if *f != *of && *f != Forced::Ambiguous {
                    *f = Forced::Ambiguous;
                    res = res.max(AbstractResult::LostPrecision);
                }
            }
        }
        for (&v, &f) in &other.forced_by {
            if !self.forced_by.contains_key(&v) {
                self.in_scope.insert(v);
                self.forced_by.insert(v, f);
                res = res.max(AbstractResult::Updated);
            }
        }
        for &e in &other.escaped {
            if self.escaped.insert(e) {
                res = res.max(AbstractResult::Updated);
            }
        }

        if !self.ambiguous_force_order && other.ambiguous_force_order {
            self.ambiguous_force_order = true;
            res = res.max(AbstractResult::Updated);
        }

        if self.argument_force_order != other.argument_force_order {
            let mine = self.argument_force_order.len();
            let theirs = other.argument_force_order.len();
            let mut common = mine;

            if mine > theirs {
                self.argument_force_order.truncate(theirs);
                self.ambiguous_force_order = true;
                common = theirs;
                res = res.max(AbstractResult::Updated);
            } else if !self.ambiguous_force_order && theirs > mine {
                self.ambiguous_force_order = true;
                res = res.max(AbstractResult::Updated);
            }

            for i in 0..common {
                if self.argument_force_order[i] != other.argument_force_order[i] {
                    self.argument_force_order.truncate(i);
                    self.ambiguous_force_order = true;
                    res = res.max(AbstractResult::Updated);
                    break;
                }
            }
        }

        res
    }
}

impl fmt::Display for ForcedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "known:")?;
        for v in &self.in_scope {
            write!(f, " {v}")?;
        }
        write!(f, " | escaped:")?;
        for v in &self.escaped {
            write!(f, " {v}")?;
        }
        for (v, forced) in &self.forced_by {
            match forced {
                Forced::By(g) => write!(f, " | {v} forced by {g}")?,
                Forced::Ambiguous => write!(f, " | {v} force is ambiguous")?,
            }
        }
        if self.ambiguous_force_order {
            write!(f, " | arg order ambiguous")
        } else {
            write!(f, " | arg order {:?}", self.argument_force_order)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
