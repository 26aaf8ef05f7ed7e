//! IR validation.
//!
//! Checks closure versions for well-formedness between passes, catching
//! malformed IR early with clear diagnostics instead of letting a later
//! pass trip over it.

use std::collections::HashMap;

use thiserror::Error;

use super::body::ClosureVersion;
use super::types::{BlockId, InstrKind};

/// A well-formedness violation in a closure version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidateError {
    #[error("`{closure}`: entry block bb{entry} out of range ({blocks} blocks)")]
    BadEntry {
        closure: String,
        entry: u32,
        blocks: usize,
    },

    #[error("`{closure}`: bb{block} has no terminator")]
    Unterminated { closure: String, block: u32 },

    #[error("`{closure}`: bb{block} jumps to non-existent bb{target}")]
    BadTarget {
        closure: String,
        block: u32,
        target: u32,
    },

    #[error("`{closure}`: bb{block} references non-existent value %{value}")]
    BadValue {
        closure: String,
        block: u32,
        value: u32,
    },

    #[error("`{closure}`: %{value} loads parameter {index} but the closure takes {params}")]
    BadParamIndex {
        closure: String,
        value: u32,
        index: usize,
        params: usize,
    },

    #[error("`{closure}`: phi %{value} names bb{block}, which is not a predecessor")]
    BadPhiInput {
        closure: String,
        value: u32,
        block: u32,
    },

    #[error("`{closure}`: %{value} references non-existent prom{promise}")]
    BadPromise {
        closure: String,
        value: u32,
        promise: u32,
    },

    #[error("`{closure}`: prom{promise} entry bb{entry} out of range")]
    BadPromiseEntry {
        closure: String,
        promise: u32,
        entry: u32,
    },

    #[error("`{closure}`: prom{promise} does not begin with LdFunctionEnv")]
    MissingEnvPrologue { closure: String, promise: u32 },
}

/// Validate a closure version for well-formedness.
pub fn validate(cv: &ClosureVersion) -> Result<(), Vec<ValidateError>> {
    let mut errors = Vec::new();
    let num_blocks = cv.blocks.len();
    let num_instrs = cv.instrs.len();
    let name = cv.name.as_str();

    if cv.entry.index() >= num_blocks {
        errors.push(ValidateError::BadEntry {
            closure: name.into(),
            entry: cv.entry.0,
            blocks: num_blocks,
        });
        return Err(errors);
    }

    // Predecessors for phi checking, over all edges.
    let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for (bi, block) in cv.blocks.iter().enumerate() {
        for succ in block.successors() {
            preds
                .entry(succ)
                .or_default()
                .push(BlockId::new(bi as u32));
        }
    }

    for (bi, block) in cv.blocks.iter().enumerate() {
        let bb = BlockId::new(bi as u32);

        let Some(term) = &block.terminator else {
            errors.push(ValidateError::Unterminated {
                closure: name.into(),
                block: bb.0,
            });
            continue;
        };

        for target in term.successors() {
            if target.index() >= num_blocks {
                errors.push(ValidateError::BadTarget {
                    closure: name.into(),
                    block: bb.0,
                    target: target.0,
                });
            }
        }
        term.for_each_operand(|op| {
            if op.index() >= num_instrs {
                errors.push(ValidateError::BadValue {
                    closure: name.into(),
                    block: bb.0,
                    value: op.0,
                });
            }
        });

        for &id in &block.instrs {
            if id.index() >= num_instrs {
                errors.push(ValidateError::BadValue {
                    closure: name.into(),
                    block: bb.0,
                    value: id.0,
                });
                continue;
            }
            let instr = cv.instr(id);
            instr.kind.for_each_operand(|op| {
                if op.index() >= num_instrs {
                    errors.push(ValidateError::BadValue {
                        closure: name.into(),
                        block: bb.0,
                        value: op.0,
                    });
                }
            });
            match &instr.kind {
                InstrKind::LdArg { index } => {
                    if *index >= cv.param_count {
                        errors.push(ValidateError::BadParamIndex {
                            closure: name.into(),
                            value: id.0,
                            index: *index,
                            params: cv.param_count,
                        });
                    }
                }
                InstrKind::MkArg { promise, .. } => {
                    if promise.index() >= cv.promises.len() {
                        errors.push(ValidateError::BadPromise {
                            closure: name.into(),
                            value: id.0,
                            promise: promise.0,
                        });
                    }
                }
                InstrKind::Phi { inputs } => {
                    let empty = Vec::new();
                    let incoming = preds.get(&bb).unwrap_or(&empty);
                    for (input, _) in inputs {
                        if !incoming.contains(input) {
                            errors.push(ValidateError::BadPhiInput {
                                closure: name.into(),
                                value: id.0,
                                block: input.0,
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    for (pi, prom) in cv.promises.iter().enumerate() {
        if prom.entry.index() >= num_blocks {
            errors.push(ValidateError::BadPromiseEntry {
                closure: name.into(),
                promise: pi as u32,
                entry: prom.entry.0,
            });
            continue;
        }
        let opens_with_env = cv
            .block(prom.entry)
            .instrs
            .first()
            .map(|&i| matches!(cv.instr(i).kind, InstrKind::LdFunctionEnv))
            .unwrap_or(false);
        if !opens_with_env {
            errors.push(ValidateError::MissingEnvPrologue {
                closure: name.into(),
                promise: pi as u32,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ============================================================================
// Tests
// ============================================================================
