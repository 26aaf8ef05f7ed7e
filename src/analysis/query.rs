//! Side queries over promise bodies.

use std::collections::HashMap;

use crate::ir::{ClosureVersion, PromiseId, Terminator};

/// Answers whether a promise body can trigger a non-local exit.
///
/// The verdict is computed at most once per distinct promise and cached
/// for the lifetime of the pass.
#[derive(Debug, Default)]
pub struct PromiseQuery {
    cache: HashMap<PromiseId, bool>,
}

impl PromiseQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether forcing this promise can leave compiled code through a
    /// deopt, directly or via a speculative guard.
    pub fn can_trigger_deopt(&mut self, cv: &ClosureVersion, promise: PromiseId) -> bool {
        if let Some(&known) = self.cache.get(&promise) {
            return known;
        }
        let entry = cv.promise(promise).entry;
        let deopts = cv.subgraph_blocks(entry).iter().any(|&bb| {
            matches!(
                cv.block(bb).terminator,
                Some(Terminator::Deopt) | Some(Terminator::Guard { .. })
            )
        });
        self.cache.insert(promise, deopts);
        deopts
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstrKind, Ty};

    #[test]
    fn test_plain_promise_cannot_deopt() {
        let mut cv = ClosureVersion::new("f", 0);
        let pb = cv.new_block();
        cv.push(pb, InstrKind::LdFunctionEnv, Ty::Env);
        let c = cv.push(pb, InstrKind::Const { value: 1 }, Ty::Value);
        cv.set_terminator(pb, Terminator::Return { value: c });
        let prom = cv.new_promise(pb);

        let mut query = PromiseQuery::new();
        assert!(!query.can_trigger_deopt(&cv, prom));
        // Second query hits the cache.
        assert!(!query.can_trigger_deopt(&cv, prom));
    }

    #[test]
    fn test_guarded_promise_can_deopt() {
        let mut cv = ClosureVersion::new("f", 0);
        let pb = cv.new_block();
        cv.push(pb, InstrKind::LdFunctionEnv, Ty::Env);
        let c = cv.push(pb, InstrKind::Const { value: 1 }, Ty::Value);
        let ok = cv.new_block();
        let bail = cv.new_block();
        cv.set_terminator(
            pb,
            Terminator::Guard {
                cond: c,
                next: ok,
                deopt: bail,
            },
        );
        cv.set_terminator(ok, Terminator::Return { value: c });
        cv.set_terminator(bail, Terminator::Deopt);
        let prom = cv.new_promise(pb);

        let mut query = PromiseQuery::new();
        assert!(query.can_trigger_deopt(&cv, prom));
    }
}
