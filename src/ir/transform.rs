//! # CFG Edit Primitives
//!
//! In-place surgery on a closure version: block splitting, subgraph
//! cloning, use replacement, and the return stitching that splices a
//! cloned promise body into its forcing site.
//!
//! All primitives operate on ids. Cloning returns an explicit
//! [`CloneMap`] so the caller can rewrite every reference into the clone
//! consistently; references pointing outside the cloned subgraph are left
//! untouched.

use std::collections::HashMap;

use super::body::ClosureVersion;
use super::cfg::DomTree;
use super::types::{BlockId, InstrId, InstrKind, Terminator, Ty, ValueId};

/// Handle-remapping table produced by [`clone_subgraph`].
#[derive(Debug)]
pub struct CloneMap {
    /// Entry block of the clone.
    pub entry: BlockId,
    /// Original block -> cloned block.
    pub blocks: HashMap<BlockId, BlockId>,
    /// Original instruction -> cloned instruction.
    pub instrs: HashMap<InstrId, InstrId>,
}

impl CloneMap {
    /// The cloned blocks, in no particular order.
    pub fn cloned_blocks(&self) -> Vec<BlockId> {
        self.blocks.values().copied().collect()
    }
}

/// Split a block at instruction position `at`. The new block receives the
/// instructions from `at` onward together with the old terminator; the
/// original block is left unterminated for the caller to rewire.
pub fn split_block(cv: &mut ClosureVersion, block: BlockId, at: usize) -> BlockId {
    let split = cv.new_block();
    let old = cv.block_mut(block);
    let tail: Vec<InstrId> = old.instrs.split_off(at);
    let term = old.terminator.take();
    let new = cv.block_mut(split);
    new.instrs = tail;
    new.terminator = term;
    split
}

/// Clone the subgraph rooted at `entry`, remapping all internal
/// references. References to values defined outside the subgraph are
/// preserved as-is.
pub fn clone_subgraph(cv: &mut ClosureVersion, entry: BlockId) -> CloneMap {
    let sources = cv.subgraph_blocks(entry);

    let mut blocks = HashMap::new();
    for &b in &sources {
        let nb = cv.new_block();
        blocks.insert(b, nb);
    }

    let mut instrs = HashMap::new();
    for &b in &sources {
        let ids: Vec<InstrId> = cv.block(b).instrs.clone();
        let target = blocks[&b];
        for id in ids {
            let copy = cv.instr(id).clone();
            let new_id = cv.add_instr(copy.kind, copy.ty);
            cv.instr_mut(new_id).effects = copy.effects;
            cv.block_mut(target).instrs.push(new_id);
            instrs.insert(id, new_id);
        }
    }

    // Second pass: rewrite internal cross-references now that every clone
    // id exists (phis may refer forward).
    for &b in &sources {
        let target = blocks[&b];
        let ids: Vec<InstrId> = cv.block(target).instrs.clone();
        for id in ids {
            let instr = cv.instr_mut(id);
            instr.kind.for_each_operand_mut(|op| {
                if let Some(&mapped) = instrs.get(op) {
                    *op = mapped;
                }
            });
            if let InstrKind::Phi { inputs } = &mut instr.kind {
                for (bb, _) in inputs {
                    if let Some(&mapped) = blocks.get(bb) {
                        *bb = mapped;
                    }
                }
            }
        }

        let mut term = cv
            .block(b)
            .terminator
            .clone()
            .expect("cloned subgraph contains an unterminated block");
        term.for_each_operand_mut(|op| {
            if let Some(&mapped) = instrs.get(op) {
                *op = mapped;
            }
        });
        let term = remap_targets(term, &blocks);
        cv.set_terminator(target, term);
    }

    CloneMap {
        entry: blocks[&entry],
        blocks,
        instrs,
    }
}

fn remap_targets(term: Terminator, blocks: &HashMap<BlockId, BlockId>) -> Terminator {
    let map = |b: BlockId| blocks.get(&b).copied().unwrap_or(b);
    match term {
        Terminator::Goto { target } => Terminator::Goto { target: map(target) },
        Terminator::Branch {
            cond,
            on_true,
            on_false,
        } => Terminator::Branch {
            cond,
            on_true: map(on_true),
            on_false: map(on_false),
        },
        Terminator::Guard { cond, next, deopt } => Terminator::Guard {
            cond,
            next: map(next),
            deopt: map(deopt),
        },
        other => other,
    }
}

/// Replace every use of `old` with `new` throughout the closure version,
/// in instruction operands and terminators alike.
pub fn replace_uses(cv: &mut ClosureVersion, old: ValueId, new: ValueId) {
    for instr in &mut cv.instrs {
        instr.kind.for_each_operand_mut(|op| {
            if *op == old {
                *op = new;
            }
        });
    }
    for block in &mut cv.blocks {
        if let Some(term) = &mut block.terminator {
            term.for_each_operand_mut(|op| {
                if *op == old {
                    *op = new;
                }
            });
        }
    }
}

/// Replace uses of `old` with `new`, restricted to the given blocks.
pub fn replace_uses_in(cv: &mut ClosureVersion, blocks: &[BlockId], old: ValueId, new: ValueId) {
    for &b in blocks {
        let ids: Vec<InstrId> = cv.block(b).instrs.clone();
        for id in ids {
            cv.instr_mut(id).kind.for_each_operand_mut(|op| {
                if *op == old {
                    *op = new;
                }
            });
        }
        if let Some(term) = &mut cv.block_mut(b).terminator {
            term.for_each_operand_mut(|op| {
                if *op == old {
                    *op = new;
                }
            });
        }
    }
}

/// Replace uses of `old` with `new` only where the use site is dominated
/// by `new`'s definition.
pub fn replace_dominated_uses(cv: &mut ClosureVersion, doms: &DomTree, old: ValueId, new: ValueId) {
    let Some((def_block, def_idx)) = cv.def_site(new) else {
        return;
    };
    for bi in 0..cv.blocks.len() {
        let bb = BlockId::new(bi as u32);
        let ids: Vec<InstrId> = cv.block(bb).instrs.clone();
        for (use_idx, &id) in ids.iter().enumerate() {
            if id == new {
                continue;
            }
            let dominated = if bb == def_block {
                def_idx < use_idx
            } else {
                doms.dominates(def_block, bb)
            };
            if dominated {
                cv.instr_mut(id).kind.for_each_operand_mut(|op| {
                    if *op == old {
                        *op = new;
                    }
                });
            }
        }
        // A terminator executes after every instruction of its block.
        let term_dominated = bb == def_block || doms.dominates(def_block, bb);
        if term_dominated {
            if let Some(term) = &mut cv.block_mut(bb).terminator {
                term.for_each_operand_mut(|op| {
                    if *op == old {
                        *op = new;
                    }
                });
            }
        }
    }
}

/// Rewire every return of the cloned subgraph to fall through to `target`,
/// yielding the value the subgraph produces. A single return feeds its
/// value through directly; several returns meet in a fresh join block
/// holding a phi.
pub fn inline_return(cv: &mut ClosureVersion, clone: &CloneMap, target: BlockId) -> ValueId {
    let mut returns: Vec<(BlockId, ValueId)> = Vec::new();
    for &b in clone.blocks.values() {
        if let Some(Terminator::Return { value }) = &cv.block(b).terminator {
            returns.push((b, *value));
        }
    }

    match returns.len() {
        0 => panic!("inlined subgraph at {} never returns", clone.entry),
        1 => {
            let (b, value) = returns[0];
            cv.set_terminator(b, Terminator::Goto { target });
            value
        }
        _ => {
            let join = cv.new_block();
            let phi = cv.push(join, InstrKind::Phi { inputs: returns.clone() }, Ty::Value);
            cv.set_terminator(join, Terminator::Goto { target });
            for (b, _) in returns {
                cv.set_terminator(b, Terminator::Goto { target: join });
            }
            phi
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
