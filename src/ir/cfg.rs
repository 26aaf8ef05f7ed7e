//! # CFG Queries
//!
//! Control-flow queries built once per pass over a closure version:
//! reachability, reverse postorder, predecessors, and dominance.
//!
//! Every query graph is rooted at an explicit entry block and built under
//! an [`EdgeMode`]: the full graph follows every edge, while the mainline
//! graph drops the deopt edge of every [`Terminator::Guard`], so blocks
//! reachable only through speculative exits disappear from it. Analyses
//! that judge dominance on the non-speculative path run over the mainline
//! graph.

use std::collections::HashSet;

use super::body::ClosureVersion;
use super::types::{BlockId, Terminator};

/// Which edges a control-flow query follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    /// Follow every edge, including speculative exits.
    Full,
    /// Drop guard deopt edges; blocks only reachable through them are
    /// treated as unreachable.
    Mainline,
}

impl EdgeMode {
    /// Successors of a terminator under this mode.
    pub fn successors(self, term: &Terminator) -> Vec<BlockId> {
        match self {
            EdgeMode::Full => term.successors(),
            EdgeMode::Mainline => term.mainline_successors(),
        }
    }
}

/// A control-flow graph over one closure version, rooted at `entry`.
#[derive(Debug)]
pub struct Cfg {
    entry: BlockId,
    mode: EdgeMode,
    rpo: Vec<BlockId>,
    preds: Vec<Vec<BlockId>>,
    reachable: Vec<bool>,
}

impl Cfg {
    /// Build the graph for the subgraph rooted at `entry`.
    pub fn new(cv: &ClosureVersion, entry: BlockId, mode: EdgeMode) -> Self {
        let n = cv.blocks.len();
        let mut visited = vec![false; n];
        let mut postorder = Vec::new();

        fn visit(
            cv: &ClosureVersion,
            mode: EdgeMode,
            bb: BlockId,
            visited: &mut [bool],
            postorder: &mut Vec<BlockId>,
        ) {
            if visited[bb.index()] {
                return;
            }
            visited[bb.index()] = true;
            if let Some(term) = &cv.block(bb).terminator {
                for succ in mode.successors(term) {
                    visit(cv, mode, succ, visited, postorder);
                }
            }
            postorder.push(bb);
        }

        visit(cv, mode, entry, &mut visited, &mut postorder);
        postorder.reverse();
        let rpo = postorder;

        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for &bb in &rpo {
            if let Some(term) = &cv.block(bb).terminator {
                for succ in mode.successors(term) {
                    preds[succ.index()].push(bb);
                }
            }
        }

        Self {
            entry,
            mode,
            rpo,
            preds,
            reachable: visited,
        }
    }

    /// The entry block of this graph.
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The edge mode this graph was built under.
    pub fn mode(&self) -> EdgeMode {
        self.mode
    }

    /// Reachable blocks in reverse postorder.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Whether a block is reachable from the entry under this mode.
    pub fn is_reachable(&self, bb: BlockId) -> bool {
        self.reachable[bb.index()]
    }

    /// Predecessors of a block, restricted to reachable blocks.
    pub fn preds(&self, bb: BlockId) -> &[BlockId] {
        &self.preds[bb.index()]
    }
}

/// Block dominance over the full graph rooted at an entry.
///
/// Iterative set intersection over reverse postorder; the graphs this pass
/// sees are small enough that the simple representation wins.
#[derive(Debug)]
pub struct DomTree {
    doms: Vec<HashSet<u32>>,
    reachable: Vec<bool>,
}

impl DomTree {
    /// Compute dominator sets for the subgraph rooted at `entry`.
    pub fn new(cv: &ClosureVersion, entry: BlockId) -> Self {
        let cfg = Cfg::new(cv, entry, EdgeMode::Full);
        let n = cv.blocks.len();
        let all: HashSet<u32> = cfg.rpo().iter().map(|b| b.0).collect();

        let mut doms: Vec<HashSet<u32>> = vec![HashSet::new(); n];
        for &bb in cfg.rpo() {
            if bb == entry {
                doms[bb.index()].insert(bb.0);
            } else {
                doms[bb.index()] = all.clone();
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &bb in cfg.rpo() {
                if bb == entry {
                    continue;
                }
                let mut new_dom: Option<HashSet<u32>> = None;
                for &p in cfg.preds(bb) {
                    new_dom = Some(match new_dom {
                        None => doms[p.index()].clone(),
                        Some(acc) => acc.intersection(&doms[p.index()]).copied().collect(),
                    });
                }
                let mut new_dom = new_dom.unwrap_or_default();
                new_dom.insert(bb.0);
                if new_dom != doms[bb.index()] {
                    doms[bb.index()] = new_dom;
                    changed = true;
                }
            }
        }

        Self {
            doms,
            reachable: (0..n).map(|i| cfg.is_reachable(BlockId::new(i as u32))).collect(),
        }
    }

    /// Whether block `a` dominates block `b`. Unreachable blocks dominate
    /// nothing and are dominated by nothing.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.reachable[a.index()]
            && self.reachable[b.index()]
            && self.doms[b.index()].contains(&a.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{InstrKind, Ty};

    /// entry -> (left | right) -> join
    fn diamond() -> (ClosureVersion, BlockId, BlockId, BlockId, BlockId) {
        let mut cv = ClosureVersion::new("diamond", 0);
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
        cv.set_terminator(left, Terminator::Goto { target: join });
        cv.set_terminator(right, Terminator::Goto { target: join });
        cv.set_terminator(join, Terminator::Return { value: cond });
        (cv, entry, left, right, join)
    }

    #[test]
    fn test_rpo_and_preds() {
        let (cv, entry, left, right, join) = diamond();
        let cfg = Cfg::new(&cv, entry, EdgeMode::Full);
        assert_eq!(cfg.rpo()[0], entry);
        assert_eq!(cfg.rpo().len(), 4);
        assert!(cfg.preds(join).contains(&left));
        assert!(cfg.preds(join).contains(&right));
        assert!(cfg.preds(entry).is_empty());
    }

    #[test]
    fn test_mainline_skips_deopt_only_blocks() {
        let mut cv = ClosureVersion::new("guarded", 0);
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

        let full = Cfg::new(&cv, entry, EdgeMode::Full);
        assert!(full.is_reachable(bail));

        let mainline = Cfg::new(&cv, entry, EdgeMode::Mainline);
        assert!(!mainline.is_reachable(bail));
        assert!(mainline.is_reachable(next));
    }

    #[test]
    fn test_dominance() {
        let (cv, entry, left, right, join) = diamond();
        let doms = DomTree::new(&cv, entry);
        assert!(doms.dominates(entry, join));
        assert!(doms.dominates(entry, left));
        assert!(!doms.dominates(left, join));
        assert!(!doms.dominates(right, join));
        assert!(doms.dominates(join, join));
    }

    #[test]
    fn test_unreachable_blocks_do_not_dominate() {
        let mut cv = ClosureVersion::new("island", 0);
        let entry = cv.entry;
        let c = cv.push(entry, InstrKind::Const { value: 0 }, Ty::Value);
        cv.set_terminator(entry, Terminator::Return { value: c });
        let island = cv.new_block();
        cv.set_terminator(island, Terminator::Deopt);

        let doms = DomTree::new(&cv, entry);
        assert!(!doms.dominates(island, entry));
        assert!(!doms.dominates(entry, island));
    }
}
