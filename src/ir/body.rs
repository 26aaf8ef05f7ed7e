//! # Closure Versions
//!
//! A [`ClosureVersion`] is one compiled variant of a source function: the
//! unit an optimization pass runs over. It owns an instruction arena, a
//! block arena, and the promise bodies created for its lazy arguments.
//!
//! Instructions live in a flat arena and are referenced from block
//! instruction lists by [`InstrId`]; removing an instruction from a block
//! detaches it without invalidating other ids. All cross-references
//! (operands, promise entries, block targets) are ids resolved through the
//! owning closure version.

use super::types::{BlockData, BlockId, Instr, InstrId, InstrKind, PromiseId, Terminator, Ty, ValueId};

/// Facts a pass has established about a closure version, consumed by later
/// passes and call-site specialization.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    /// The closure forces its parameters in declaration order before any
    /// side effect, so calling it eagerly is behaviorally equivalent.
    pub is_eager: bool,
    /// The order in which parameter promises were observed to be forced.
    pub argument_force_order: Vec<usize>,
}

/// A deferred computation's body: an independent CFG owned by the closure
/// version, entered when a promise built over it is first forced.
#[derive(Debug, Clone)]
pub struct Promise {
    /// Entry block of the promise body.
    pub entry: BlockId,
}

/// One compiled variant of a source function.
#[derive(Debug, Clone)]
pub struct ClosureVersion {
    /// Name of the source function, for diagnostics.
    pub name: String,
    /// Number of formal parameters.
    pub param_count: usize,
    /// Entry block of the function body.
    pub entry: BlockId,
    /// Block arena. Promise bodies live here too, reachable only from
    /// their promise entries.
    pub blocks: Vec<BlockData>,
    /// Instruction arena.
    pub instrs: Vec<Instr>,
    /// Promise bodies owned by this version.
    pub promises: Vec<Promise>,
    /// Facts established by optimization passes.
    pub properties: Properties,
}

impl ClosureVersion {
    /// Create a new closure version with an empty entry block.
    pub fn new(name: impl Into<String>, param_count: usize) -> Self {
        let mut cv = Self {
            name: name.into(),
            param_count,
            entry: BlockId::new(0),
            blocks: Vec::new(),
            instrs: Vec::new(),
            promises: Vec::new(),
            properties: Properties::default(),
        };
        cv.entry = cv.new_block();
        cv
    }

    /// Get a block.
    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.index()]
    }

    /// Get a block mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.index()]
    }

    /// Get an instruction.
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.index()]
    }

    /// Get an instruction mutably.
    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.index()]
    }

    /// Get a promise.
    pub fn promise(&self, id: PromiseId) -> &Promise {
        &self.promises[id.index()]
    }

    /// Allocate a new empty basic block.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BlockData::new());
        id
    }

    /// Register a promise body rooted at `entry`.
    pub fn new_promise(&mut self, entry: BlockId) -> PromiseId {
        let id = PromiseId::new(self.promises.len() as u32);
        self.promises.push(Promise { entry });
        id
    }

    /// Allocate an instruction in the arena without placing it in a block.
    pub fn add_instr(&mut self, kind: InstrKind, ty: Ty) -> InstrId {
        let id = InstrId::new(self.instrs.len() as u32);
        self.instrs.push(Instr::new(kind, ty));
        id
    }

    /// Append a new instruction to a block.
    pub fn push(&mut self, block: BlockId, kind: InstrKind, ty: Ty) -> InstrId {
        let id = self.add_instr(kind, ty);
        self.blocks[block.index()].instrs.push(id);
        id
    }

    /// Insert a new instruction into a block at position `at`.
    pub fn insert(&mut self, block: BlockId, at: usize, kind: InstrKind, ty: Ty) -> InstrId {
        let id = self.add_instr(kind, ty);
        self.blocks[block.index()].instrs.insert(at, id);
        id
    }

    /// Remove the instruction at position `at` from a block, returning its
    /// id. The instruction stays in the arena, detached.
    pub fn remove(&mut self, block: BlockId, at: usize) -> InstrId {
        self.blocks[block.index()].instrs.remove(at)
    }

    /// Remove a specific instruction from a block by id.
    pub fn remove_instr(&mut self, block: BlockId, id: InstrId) {
        let instrs = &mut self.blocks[block.index()].instrs;
        if let Some(pos) = instrs.iter().position(|&i| i == id) {
            instrs.remove(pos);
        }
    }

    /// Set the terminator for a block.
    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.blocks[block.index()].terminator = Some(term);
    }

    /// The block and position where an instruction is currently placed.
    pub fn def_site(&self, id: InstrId) -> Option<(BlockId, usize)> {
        for (bi, block) in self.blocks.iter().enumerate() {
            if let Some(pos) = block.instrs.iter().position(|&i| i == id) {
                return Some((BlockId::new(bi as u32), pos));
            }
        }
        None
    }

    /// Resolve a value through any chain of type casts.
    pub fn resolve_casts(&self, mut v: ValueId) -> ValueId {
        loop {
            match &self.instr(v).kind {
                InstrKind::CastType { arg } => v = *arg,
                _ => return v,
            }
        }
    }

    /// Resolve a value through type casts and forces down to the value
    /// being forced, typically the promise construction itself.
    pub fn unwrap_promise(&self, mut v: ValueId) -> ValueId {
        loop {
            match &self.instr(v).kind {
                InstrKind::CastType { arg } | InstrKind::Force { arg, .. } => v = *arg,
                _ => return v,
            }
        }
    }

    /// Blocks reachable from `entry` along all edges, in visit order.
    pub fn subgraph_blocks(&self, entry: BlockId) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::new();
        let mut worklist = vec![entry];
        while let Some(bb) = worklist.pop() {
            if visited[bb.index()] {
                continue;
            }
            visited[bb.index()] = true;
            order.push(bb);
            for succ in self.block(bb).successors() {
                if !visited[succ.index()] {
                    worklist.push(succ);
                }
            }
        }
        order
    }

    /// Instruction count of the subgraph rooted at `entry`.
    pub fn subgraph_size(&self, entry: BlockId) -> usize {
        self.subgraph_blocks(entry)
            .iter()
            .map(|&b| self.block(b).instrs.len())
            .sum()
    }

    /// Instruction count of a promise body.
    pub fn promise_size(&self, id: PromiseId) -> usize {
        self.subgraph_size(self.promise(id).entry)
    }

    /// Total instruction count of this version: the function body plus
    /// every promise body.
    pub fn size(&self) -> usize {
        let mut total = self.subgraph_size(self.entry);
        for prom in &self.promises {
            total += self.subgraph_size(prom.entry);
        }
        total
    }
}

// ============================================================================
// Tests
// ============================================================================
