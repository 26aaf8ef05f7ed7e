//! # Force Dominance
//!
//! Removes redundant force instructions and inlines promise bodies at
//! their forcing sites.
//!
//! A force is redundant when another force of the same value is known to
//! have executed on every path reaching it:
//!
//! ```text
//! b = force(a)
//! c = force(b)      ; c can be replaced by b
//! ```
//!
//! When the value being forced is a known promise construction, the
//! promise body is spliced directly into the forcing site, provided a
//! unique dominating force exists. A force after a join where only one
//! arm forced the value sees ambiguous knowledge and is left alone:
//!
//! ```text
//!      branch
//!   /          \
//! force         |
//!   \          /
//!       force        ; was the promise evaluated already? unknown
//! ```
//!
//! The pass also records whether the closure forces its parameters in
//! declaration order before any side effect, which lets call sites switch
//! to eager argument evaluation.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::analysis::dataflow::{self, AbstractResult, Converged, TransferFunction};
use crate::analysis::query::PromiseQuery;
use crate::config::Config;
use crate::ir::{
    transform, BlockId, ClosureVersion, DomTree, EdgeMode, EffectSet, InstrId, InstrKind,
    PromiseId, Terminator, Ty, ValueId,
};
use crate::opt::forced_by::{ForcedBy, PromiseInlineable};

// ============================================================================
// Transfer function
// ============================================================================

struct Transfer {
    param_count: usize,
}

/// Operands observed without being forced escape local reasoning.
fn escape_operands(cv: &ClosureVersion, id: InstrId, state: &mut ForcedBy) -> bool {
    let mut operands = Vec::new();
    cv.instr(id).kind.for_each_operand(|v| operands.push(v));

    let mut changed = false;
    for v in operands {
        let v = cv.resolve_casts(v);
        let target = cv.instr(v);
        let promise_like = matches!(
            target.kind,
            InstrKind::MkArg { .. } | InstrKind::LdArg { .. }
        ) || target.ty.maybe_lazy();
        if promise_like {
            changed |= state.escape(v);
        }
    }
    changed
}

impl TransferFunction for Transfer {
    type Domain = ForcedBy;

    fn apply(&self, cv: &ClosureVersion, id: InstrId, state: &mut ForcedBy) -> AbstractResult {
        let mut res = AbstractResult::None;
        let instr = cv.instr(id);

        match &instr.kind {
            InstrKind::Force { .. } => {
                let target = cv.unwrap_promise(id);
                match &cv.instr(target).kind {
                    InstrKind::LdArg { index } if cv.instr(target).ty.maybe_lazy() => {
                        let index = *index;
                        if state.forced_at(target, id) {
                            res = res.max(AbstractResult::Updated);
                        }
                        if !state.ambiguous_force_order && !state.maybe_forced(index) {
                            state.argument_force_order.push(index);
                            res = res.max(AbstractResult::Updated);
                        }
                    }
                    InstrKind::MkArg { .. } => {
                        if state.forced_at(target, id) {
                            res = res.max(AbstractResult::Updated);
                        }
                    }
                    _ if cv.instr(target).ty.maybe_lazy() => {
                        if state.forced_at(target, id) {
                            res = res.max(AbstractResult::Updated);
                        }
                    }
                    _ => {}
                }
            }
            InstrKind::MkArg { .. } => {
                if state.declare(id) {
                    res = res.max(AbstractResult::Updated);
                }
            }
            InstrKind::MkEnv { stub, .. } => {
                if !stub && escape_operands(cv, id, state) {
                    res = res.max(AbstractResult::Updated);
                }
            }
            InstrKind::CastType { .. } => {}
            _ => {
                if instr.ty.maybe_lazy() && state.declare(id) {
                    res = res.max(AbstractResult::Updated);
                }
                if escape_operands(cv, id, state) {
                    res = res.max(AbstractResult::Updated);
                }
                if instr.effects.contains(EffectSet::FORCE) {
                    if state.sideeffect() {
                        res = res.max(AbstractResult::Tainted);
                    }
                    if !state.ambiguous_force_order
                        && state.argument_force_order.len() < self.param_count
                    {
                        // Past the first untracked effect the remaining order
                        // cannot be used to make arguments eager anyway, since
                        // reordering the outstanding evaluations would
                        // observably reorder effects.
                        state.ambiguous_force_order = true;
                        res = res.max(AbstractResult::Tainted);
                    }
                }
            }
        }
        res
    }
}

// ============================================================================
// Analysis driver
// ============================================================================

/// Converged force knowledge over one closure version.
///
/// Two fixed points are kept: one over the full CFG, and one over the
/// mainline CFG with speculative exit edges removed, so that bailout
/// paths do not pollute the dominance judgment on the hot path.
pub struct ForceDominanceAnalysis {
    transfer: Transfer,
    full: Converged<ForcedBy>,
    mainline: Converged<ForcedBy>,
}

impl ForceDominanceAnalysis {
    /// Run the analysis to convergence.
    pub fn run(cv: &ClosureVersion) -> Self {
        let transfer = Transfer {
            param_count: cv.param_count,
        };
        let full = dataflow::run(cv, cv.entry, &transfer, EdgeMode::Full);
        let mainline = dataflow::run(cv, cv.entry, &transfer, EdgeMode::Mainline);
        Self {
            transfer,
            full,
            mainline,
        }
    }

    /// State before the instruction at `(block, idx)`, over all paths.
    pub fn before(&self, cv: &ClosureVersion, block: BlockId, idx: usize) -> ForcedBy {
        self.full.before(cv, &self.transfer, block, idx)
    }

    /// State after the instruction at `(block, idx)`, over all paths.
    pub fn after(&self, cv: &ClosureVersion, block: BlockId, idx: usize) -> ForcedBy {
        self.full.after(cv, &self.transfer, block, idx)
    }

    /// State after the instruction at `(block, idx)`, ignoring paths that
    /// exist only through speculative exits.
    pub fn mainline_after(&self, cv: &ClosureVersion, block: BlockId, idx: usize) -> ForcedBy {
        self.mainline.after(cv, &self.transfer, block, idx)
    }

    /// The merged state over all closure exits.
    pub fn result(&self) -> &ForcedBy {
        self.full.exit()
    }

    /// Whether convergence lost precision through untracked side effects.
    pub fn tainted(&self) -> bool {
        self.full.tainted()
    }
}

// ============================================================================
// Pass driver
// ============================================================================

/// The force dominance and promise inlining pass.
#[derive(Debug, Default)]
pub struct ForceDominance {
    config: Config,
}

impl ForceDominance {
    /// Create the pass with default thresholds.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Create the pass with explicit thresholds.
    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Run the pass over one closure version, mutating it in place.
    pub fn apply(&self, cv: &mut ClosureVersion) {
        let mut to_inline: HashSet<InstrId> = HashSet::new();
        let mut needs_update: HashSet<InstrId> = HashSet::new();
        let mut dominated_by: HashMap<InstrId, InstrId> = HashMap::new();
        let mut dead_updates: Vec<(BlockId, InstrId)> = Vec::new();

        let is_huge = cv.size() > self.config.promise_inliner_max_size;
        let lost_precision;

        {
            let analysis = ForceDominanceAnalysis::run(cv);
            lost_precision = analysis.tainted();

            if analysis.result().eager_like_function(cv) {
                cv.properties.is_eager = true;
            }
            cv.properties.argument_force_order = analysis.result().argument_force_order.clone();

            let mut query = PromiseQuery::new();
            let mainline: Vec<BlockId> = {
                let cfg = crate::ir::Cfg::new(cv, cv.entry, EdgeMode::Mainline);
                cfg.rpo().to_vec()
            };

            // Phase A: classify every force on the mainline, and find
            // promise updates nothing can observe.
            for &bb in &mainline {
                let instrs: Vec<InstrId> = cv.block(bb).instrs.clone();
                for (idx, &i) in instrs.iter().enumerate() {
                    match &cv.instr(i).kind {
                        InstrKind::Force { .. } => {
                            let state = analysis.mainline_after(cv, bb, idx);
                            trace!(force = %i, state = %state, "classifying");
                            if state.is_dominating_force(i, cv) {
                                if let InstrKind::Force { strict, .. } = &mut cv.instr_mut(i).kind {
                                    *strict = true;
                                }
                                let mk = cv.unwrap_promise(i);
                                if let InstrKind::MkArg {
                                    eager: None,
                                    promise,
                                    ..
                                } = &cv.instr(mk).kind
                                {
                                    let promise = *promise;
                                    if !is_huge
                                        || cv.promise_size(promise) < self.config.small_promise_size
                                    {
                                        let after = analysis.after(cv, bb, idx);
                                        match after.is_safe_to_inline(mk, cv, &mut query) {
                                            PromiseInlineable::NotSafeToInline => {}
                                            PromiseInlineable::SafeToInline => {
                                                to_inline.insert(i);
                                            }
                                            PromiseInlineable::SafeToInlineWithUpdate => {
                                                to_inline.insert(i);
                                                needs_update.insert(i);
                                            }
                                        }
                                    }
                                }
                            } else if let Some(dom) = state.get_dominating_force(i, cv) {
                                if dom != i {
                                    dominated_by.insert(i, dom);
                                }
                            }
                        }
                        InstrKind::UpdatePromise { promise, .. } => {
                            let target = *promise;
                            if matches!(cv.instr(target).kind, InstrKind::MkArg { .. })
                                && !analysis.before(cv, bb, idx).escaped.contains(&target)
                            {
                                dead_updates.push((bb, i));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        for &(bb, i) in &dead_updates {
            cv.remove_instr(bb, i);
        }

        // Phase B: inline dominating promises and collapse handles whose
        // payload is already evaluated.
        let mut inlined_promise: HashMap<InstrId, ValueId> = HashMap::new();
        let mut forced_mk_arg: HashMap<InstrId, InstrId> = HashMap::new();

        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut worklist = vec![cv.entry];
        while let Some(bb) = worklist.pop() {
            if !visited.insert(bb) {
                continue;
            }
            let mut idx = 0;
            while idx < cv.block(bb).instrs.len() {
                let i = cv.block(bb).instrs[idx];
                match &cv.instr(i).kind {
                    InstrKind::Force { .. } => {
                        let mk = cv.unwrap_promise(i);
                        if let InstrKind::MkArg {
                            eager,
                            promise,
                            env,
                        } = &cv.instr(mk).kind
                        {
                            let (eager, promise, env) = (*eager, *promise, *env);
                            if let Some(payload) = eager {
                                transform::replace_uses(cv, i, payload);
                                cv.remove(bb, idx);
                                continue;
                            } else if to_inline.contains(&i) {
                                self.inline_promise(
                                    cv,
                                    bb,
                                    idx,
                                    i,
                                    mk,
                                    promise,
                                    env,
                                    needs_update.contains(&i),
                                    &mut inlined_promise,
                                    &mut forced_mk_arg,
                                );
                                // The rest of this block moved behind the
                                // inlined body; it is picked up as a successor.
                                break;
                            }
                        }
                    }
                    InstrKind::CastType { arg } => {
                        let arg = *arg;
                        if let InstrKind::MkArg {
                            eager: Some(payload),
                            ..
                        } = &cv.instr(arg).kind
                        {
                            let payload = *payload;
                            transform::replace_uses(cv, i, payload);
                            cv.remove(bb, idx);
                            continue;
                        }
                    }
                    _ => {}
                }
                idx += 1;
            }
            for succ in cv.block(bb).successors() {
                if !visited.contains(&succ) {
                    worklist.push(succ);
                }
            }
        }

        // Phase C: forces dominated by another force collapse onto the
        // dominating value.
        let mut dominated_removed = 0usize;
        for bb in cv.subgraph_blocks(cv.entry) {
            let mut idx = 0;
            while idx < cv.block(bb).instrs.len() {
                let i = cv.block(bb).instrs[idx];
                let dom = match cv.instr(i).kind {
                    InstrKind::Force { .. } => dominated_by.get(&i).copied(),
                    _ => None,
                };
                if let Some(dom) = dom {
                    assert_ne!(i, dom, "force {i} classified as dominated by itself");
                    let replacement = inlined_promise.get(&dom).copied().unwrap_or(dom);
                    transform::replace_uses(cv, i, replacement);
                    cv.remove(bb, idx);
                    dominated_removed += 1;
                    continue;
                }
                idx += 1;
            }
        }

        // Remaining uses of an inlined promise handle downstream of the
        // inlining point switch to the settled, eager handle.
        if !forced_mk_arg.is_empty() {
            let doms = DomTree::new(cv, cv.entry);
            for (&mk, &fixed) in &forced_mk_arg {
                transform::replace_dominated_uses(cv, &doms, mk, fixed);
                // Updates write through the original escaped handle; the
                // settled twin is a fresh object nothing else observes.
                for bi in 0..cv.blocks.len() {
                    let ids: Vec<InstrId> = cv.blocks[bi].instrs.clone();
                    for id in ids {
                        if let InstrKind::UpdatePromise { promise, .. } =
                            &mut cv.instr_mut(id).kind
                        {
                            if *promise == fixed {
                                *promise = mk;
                            }
                        }
                    }
                }
            }
            self.sweep_dead_handles(cv, &forced_mk_arg);
        }

        debug!(
            closure = %cv.name,
            inlined = inlined_promise.len(),
            dominated = dominated_removed,
            dead_updates = dead_updates.len(),
            is_eager = cv.properties.is_eager,
            lost_precision,
            "force dominance applied"
        );
    }

    /// Splice a promise body between the two halves of the forcing block.
    #[allow(clippy::too_many_arguments)]
    fn inline_promise(
        &self,
        cv: &mut ClosureVersion,
        bb: BlockId,
        idx: usize,
        force: InstrId,
        mk: InstrId,
        promise: PromiseId,
        prom_env: ValueId,
        needs_update: bool,
        inlined_promise: &mut HashMap<InstrId, ValueId>,
        forced_mk_arg: &mut HashMap<InstrId, InstrId>,
    ) {
        let split = transform::split_block(cv, bb, idx);
        let clone = transform::clone_subgraph(cv, cv.promise(promise).entry);
        cv.set_terminator(
            bb,
            Terminator::Goto {
                target: clone.entry,
            },
        );
        let clone_blocks = clone.cloned_blocks();

        // Promise bodies open with a reference to their function
        // environment; rebind it to the environment the handle captured.
        // TODO: support promise prologues that load a specific parent
        // environment instead of LdFunctionEnv once the lowerer emits them.
        let prologue = *cv
            .block(clone.entry)
            .instrs
            .first()
            .unwrap_or_else(|| panic!("inlined {promise} has an empty entry block"));
        assert!(
            matches!(cv.instr(prologue).kind, InstrKind::LdFunctionEnv),
            "inlined {promise} does not begin with LdFunctionEnv"
        );
        transform::replace_uses_in(cv, &clone_blocks, prologue, prom_env);
        cv.remove(clone.entry, 0);

        // Forces inside the inlined body may observe this function's local
        // environment when it is materialized on the call context.
        let caller_env = match &cv.instr(force).kind {
            InstrKind::Force { env, .. } => *env,
            other => panic!("inlining a non-force instruction {force}: {other:?}"),
        };
        if let Some(fenv) = caller_env {
            if matches!(
                cv.instr(fenv).kind,
                InstrKind::MkEnv { context: true, .. }
            ) {
                for &cb in &clone_blocks {
                    let ids: Vec<InstrId> = cv.block(cb).instrs.clone();
                    for id in ids {
                        if let InstrKind::Force { env: Some(e), .. } = &mut cv.instr_mut(id).kind {
                            *e = fenv;
                        }
                    }
                }
            }
        }

        let prom_res = transform::inline_return(cv, &clone, split);
        assert!(
            cv.instr(prom_res).ty != Ty::Lazy,
            "inlined {promise} produced a promise-wrapped result"
        );

        transform::replace_uses(cv, force, prom_res);
        let removed = cv.remove(split, 0);
        debug_assert_eq!(removed, force);

        // Downstream consumers of the handle get a settled, eager twin.
        let fixed = cv.insert(
            split,
            0,
            InstrKind::MkArg {
                promise,
                env: prom_env,
                eager: Some(prom_res),
            },
            Ty::Lazy,
        );
        forced_mk_arg.insert(mk, fixed);
        inlined_promise.insert(force, prom_res);

        if needs_update {
            cv.insert(
                split,
                1,
                InstrKind::UpdatePromise {
                    promise: mk,
                    value: prom_res,
                },
                Ty::Value,
            );
        }
    }

    /// Drop promise constructions the pass settled that nothing references
    /// anymore.
    fn sweep_dead_handles(&self, cv: &mut ClosureVersion, pairs: &HashMap<InstrId, InstrId>) {
        for (&mk, &fixed) in pairs {
            for id in [fixed, mk] {
                if !has_uses(cv, id) {
                    if let Some((block, _)) = cv.def_site(id) {
                        cv.remove_instr(block, id);
                    }
                }
            }
        }
    }
}

/// Whether any placed instruction or terminator references `id`.
fn has_uses(cv: &ClosureVersion, id: ValueId) -> bool {
    for block in &cv.blocks {
        for &i in &block.instrs {
            let mut used = false;
            cv.instr(i).kind.for_each_operand(|op| used |= op == id);
            if used {
                return true;
            }
        }
        if let Some(term) = &block.terminator {
            let mut used = false;
            term.for_each_operand(|op| used |= op == id);
            if used {
                return true;
            }
        }
    }
    false
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_declares_lazy_results() {
        let mut cv = ClosureVersion::new("f", 0);
        let entry = cv.entry;
        let callee = cv.push(entry, InstrKind::Const { value: 0 }, Ty::Value);
        let call = cv.push(
            entry,
            InstrKind::Call {
                callee,
                args: vec![],
            },
            Ty::Lazy,
        );
        cv.set_terminator(entry, Terminator::Return { value: call });

        let transfer = Transfer { param_count: 0 };
        let mut state = ForcedBy::default();
        transfer.apply(&cv, call, &mut state);
        assert!(state.in_scope.contains(&call));
    }

    #[test]
    fn test_effectful_instruction_gives_up_on_order() {
        let mut cv = ClosureVersion::new("f", 2);
        let entry = cv.entry;
        let callee = cv.push(entry, InstrKind::Const { value: 0 }, Ty::Value);
        let call = cv.push(
            entry,
            InstrKind::Call {
                callee,
                args: vec![],
            },
            Ty::Value,
        );
        cv.set_terminator(entry, Terminator::Return { value: call });

        let transfer = Transfer { param_count: 2 };
        let mut state = ForcedBy::default();
        let res = transfer.apply(&cv, call, &mut state);
        assert!(state.ambiguous_force_order);
        assert_eq!(res, AbstractResult::Tainted);
    }

    #[test]
    fn test_sideeffect_taints_escaped_values() {
        let mut cv = ClosureVersion::new("f", 0);
        let entry = cv.entry;
        let env = cv.push(
            entry,
            InstrKind::MkEnv {
                parent: None,
                values: vec![],
                stub: false,
                context: false,
            },
            Ty::Env,
        );
        let pb = cv.new_block();
        cv.push(pb, InstrKind::LdFunctionEnv, Ty::Env);
        let c = cv.push(pb, InstrKind::Const { value: 1 }, Ty::Value);
        cv.set_terminator(pb, Terminator::Return { value: c });
        let prom = cv.new_promise(pb);
        let mk = cv.push(
            entry,
            InstrKind::MkArg {
                promise: prom,
                env,
                eager: None,
            },
            Ty::Lazy,
        );
        let st = cv.push(
            entry,
            InstrKind::StVar {
                slot: 0,
                value: mk,
                env,
            },
            Ty::Value,
        );
        let callee = cv.push(entry, InstrKind::Const { value: 0 }, Ty::Value);
        let call = cv.push(
            entry,
            InstrKind::Call {
                callee,
                args: vec![],
            },
            Ty::Value,
        );
        cv.set_terminator(entry, Terminator::Return { value: call });

        let transfer = Transfer { param_count: 0 };
        let mut state = ForcedBy::default();
        transfer.apply(&cv, mk, &mut state);
        transfer.apply(&cv, st, &mut state);
        assert!(state.escaped.contains(&mk));

        transfer.apply(&cv, call, &mut state);
        assert_eq!(
            state.forced_by.get(&mk),
            Some(&crate::opt::forced_by::Forced::Ambiguous)
        );
    }
}
