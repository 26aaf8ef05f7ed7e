//! # Core IR Types
//!
//! This module defines the fundamental types of the Haze SSA representation.
//!
//! ## Type Hierarchy
//!
//! ```text
//! ClosureVersion
//! └── BlockData
//!     ├── Vec<InstrId>          (instructions, executed in order)
//!     └── Terminator
//!         ├── Goto { target }
//!         ├── Branch { cond, on_true, on_false }
//!         ├── Guard { cond, next, deopt }
//!         ├── Return { value }
//!         └── Deopt
//! ```
//!
//! Every instruction defines exactly one SSA value, so instructions and
//! values share one id space: a [`ValueId`] *is* the [`InstrId`] of the
//! instruction that defines it.

use std::fmt;

// ============================================================================
// Ids
// ============================================================================

/// A unique identifier for a basic block within a closure version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Create a new BlockId.
    pub const fn new(id: u32) -> Self {
        BlockId(id)
    }

    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A unique identifier for an instruction, and for the SSA value it defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl InstrId {
    /// Create a new InstrId.
    pub const fn new(id: u32) -> Self {
        InstrId(id)
    }

    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An SSA value reference. Values are defined by instructions, so the two
/// id spaces coincide.
pub type ValueId = InstrId;

/// A unique identifier for a promise body owned by a closure version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(pub u32);

impl PromiseId {
    /// Create a new PromiseId.
    pub const fn new(id: u32) -> Self {
        PromiseId(id)
    }

    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prom{}", self.0)
    }
}

// ============================================================================
// Types and effects
// ============================================================================

/// Static result type of an instruction, as far as laziness is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    /// A fully evaluated value.
    Value,
    /// May still be an unevaluated promise handle.
    Lazy,
    /// A runtime environment.
    Env,
}

impl Ty {
    /// Whether a value of this type may be an unevaluated promise.
    pub fn maybe_lazy(self) -> bool {
        matches!(self, Ty::Lazy)
    }
}

/// Static effect summary of an instruction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EffectSet(u8);

impl EffectSet {
    pub const NONE: EffectSet = EffectSet(0);
    /// May force promises as a side effect.
    pub const FORCE: EffectSet = EffectSet(1 << 0);
    /// Reads from an environment.
    pub const READ_ENV: EffectSet = EffectSet(1 << 1);
    /// Writes to an environment.
    pub const WRITE_ENV: EffectSet = EffectSet(1 << 2);

    /// Whether this set contains all effects of `other`.
    pub fn contains(self, other: EffectSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two effect sets.
    pub const fn union(self, other: EffectSet) -> EffectSet {
        EffectSet(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ============================================================================
// Instructions
// ============================================================================

/// The kind of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrKind {
    /// Reference to a formal parameter by position.
    LdArg { index: usize },

    /// Integer constant.
    Const { value: i64 },

    /// Construct a lazy promise handle over `promise`, closing over `env`.
    /// `eager` carries the payload when the argument was already evaluated
    /// at the call site.
    MkArg {
        promise: PromiseId,
        env: ValueId,
        eager: Option<ValueId>,
    },

    /// Evaluate a promise handle, yielding its settled value. `strict` is
    /// set once this force is proven to execute before every other force
    /// of the same target.
    Force {
        arg: ValueId,
        env: Option<ValueId>,
        strict: bool,
    },

    /// Type assertion/refinement. Transparent to dataflow.
    CastType { arg: ValueId },

    /// Materialize an environment binding the given values. Stub
    /// environments are placeholders elided at runtime; context
    /// environments are reachable from the call context.
    MkEnv {
        parent: Option<ValueId>,
        values: Vec<ValueId>,
        stub: bool,
        context: bool,
    },

    /// Reference to the enclosing function's environment. Promise bodies
    /// begin with this.
    LdFunctionEnv,

    /// Notify an escaped promise handle that its value has been computed.
    UpdatePromise { promise: ValueId, value: ValueId },

    /// SSA join of values flowing in from predecessor blocks.
    Phi { inputs: Vec<(BlockId, ValueId)> },

    /// Call a closure. May force any promise reachable from its operands
    /// or the environment.
    Call { callee: ValueId, args: Vec<ValueId> },

    /// Bind a value into an environment slot without observing it.
    StVar {
        slot: usize,
        value: ValueId,
        env: ValueId,
    },
}

impl InstrKind {
    /// The static effect set of this instruction kind.
    pub fn default_effects(&self) -> EffectSet {
        match self {
            InstrKind::Force { .. } => EffectSet::FORCE.union(EffectSet::READ_ENV),
            InstrKind::Call { .. } => EffectSet::FORCE
                .union(EffectSet::READ_ENV)
                .union(EffectSet::WRITE_ENV),
            InstrKind::StVar { .. } | InstrKind::UpdatePromise { .. } => EffectSet::WRITE_ENV,
            InstrKind::LdFunctionEnv => EffectSet::READ_ENV,
            InstrKind::LdArg { .. }
            | InstrKind::Const { .. }
            | InstrKind::MkArg { .. }
            | InstrKind::CastType { .. }
            | InstrKind::MkEnv { .. }
            | InstrKind::Phi { .. } => EffectSet::NONE,
        }
    }

    /// Visit every value operand.
    pub fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            InstrKind::LdArg { .. } | InstrKind::Const { .. } | InstrKind::LdFunctionEnv => {}
            InstrKind::MkArg { env, eager, .. } => {
                f(*env);
                if let Some(e) = eager {
                    f(*e);
                }
            }
            InstrKind::Force { arg, env, .. } => {
                f(*arg);
                if let Some(e) = env {
                    f(*e);
                }
            }
            InstrKind::CastType { arg } => f(*arg),
            InstrKind::MkEnv { parent, values, .. } => {
                if let Some(p) = parent {
                    f(*p);
                }
                for v in values {
                    f(*v);
                }
            }
            InstrKind::UpdatePromise { promise, value } => {
                f(*promise);
                f(*value);
            }
            InstrKind::Phi { inputs } => {
                for (_, v) in inputs {
                    f(*v);
                }
            }
            InstrKind::Call { callee, args } => {
                f(*callee);
                for a in args {
                    f(*a);
                }
            }
            InstrKind::StVar { value, env, .. } => {
                f(*value);
                f(*env);
            }
        }
    }

    /// Visit every value operand mutably.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            InstrKind::LdArg { .. } | InstrKind::Const { .. } | InstrKind::LdFunctionEnv => {}
            InstrKind::MkArg { env, eager, .. } => {
                f(env);
                if let Some(e) = eager {
                    f(e);
                }
            }
            InstrKind::Force { arg, env, .. } => {
                f(arg);
                if let Some(e) = env {
                    f(e);
                }
            }
            InstrKind::CastType { arg } => f(arg),
            InstrKind::MkEnv { parent, values, .. } => {
                if let Some(p) = parent {
                    f(p);
                }
                for v in values {
                    f(v);
                }
            }
            InstrKind::UpdatePromise { promise, value } => {
                f(promise);
                f(value);
            }
            InstrKind::Phi { inputs } => {
                for (_, v) in inputs {
                    f(v);
                }
            }
            InstrKind::Call { callee, args } => {
                f(callee);
                for a in args {
                    f(a);
                }
            }
            InstrKind::StVar { value, env, .. } => {
                f(value);
                f(env);
            }
        }
    }
}

/// An instruction together with its result type and static effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    /// The kind of instruction.
    pub kind: InstrKind,
    /// The result type.
    pub ty: Ty,
    /// Static effect summary.
    pub effects: EffectSet,
}

impl Instr {
    /// Create an instruction with the default effects for its kind.
    pub fn new(kind: InstrKind, ty: Ty) -> Self {
        let effects = kind.default_effects();
        Self { kind, ty, effects }
    }
}

// ============================================================================
// Terminators
// ============================================================================

/// A terminator ends a basic block. Terminators can have multiple
/// successors, unlike instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Unconditional jump.
    Goto { target: BlockId },

    /// Two-way conditional branch.
    Branch {
        cond: ValueId,
        on_true: BlockId,
        on_false: BlockId,
    },

    /// Speculative guard: continues to `next` while the assumption holds,
    /// otherwise transfers to the `deopt` exit path.
    Guard {
        cond: ValueId,
        next: BlockId,
        deopt: BlockId,
    },

    /// Return from the closure.
    Return { value: ValueId },

    /// Non-local exit out of compiled code.
    Deopt,
}

impl Terminator {
    /// All successor blocks.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Goto { target } => vec![*target],
            Terminator::Branch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            Terminator::Guard { next, deopt, .. } => vec![*next, *deopt],
            Terminator::Return { .. } | Terminator::Deopt => vec![],
        }
    }

    /// Successor blocks reachable without taking a speculative exit edge.
    pub fn mainline_successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Guard { next, .. } => vec![*next],
            other => other.successors(),
        }
    }

    /// Whether this terminator leaves the closure.
    pub fn is_exit(&self) -> bool {
        matches!(self, Terminator::Return { .. } | Terminator::Deopt)
    }

    /// Visit every value operand.
    pub fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Terminator::Branch { cond, .. } | Terminator::Guard { cond, .. } => f(*cond),
            Terminator::Return { value } => f(*value),
            Terminator::Goto { .. } | Terminator::Deopt => {}
        }
    }

    /// Visit every value operand mutably.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Terminator::Branch { cond, .. } | Terminator::Guard { cond, .. } => f(cond),
            Terminator::Return { value } => f(value),
            Terminator::Goto { .. } | Terminator::Deopt => {}
        }
    }
}

// ============================================================================
// Basic blocks
// ============================================================================

/// A basic block: a sequence of instructions followed by a single
/// terminator.
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    /// Instructions executed sequentially.
    pub instrs: Vec<InstrId>,
    /// The terminator that ends this block.
    pub terminator: Option<Terminator>,
}

impl BlockData {
    /// Create a new empty basic block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if this block has a terminator.
    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }

    /// Get successor blocks.
    pub fn successors(&self) -> Vec<BlockId> {
        match &self.terminator {
            Some(term) => term.successors(),
            None => vec![],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
