// SPDX-License-Identifier: MIT

//! Routing decision for a graph fork

use super::state::StateStore;

/// Pure decision function choosing the successor of a fork step.
///
/// `route` must return one of `targets()`; anything else is reported by the
/// engine as a fault at the fork.
pub trait Router: Send + Sync {
    fn targets(&self) -> &[String];

    fn route(&self, state: &StateStore) -> String;
}

/// A router backed by a closure
pub struct FnRouter {
    targets: Vec<String>,
    func: Box<dyn Fn(&StateStore) -> String + Send + Sync>,
}

impl FnRouter {
    pub fn new<F>(targets: &[&str], func: F) -> Self
    where
        F: Fn(&StateStore) -> String + Send + Sync + 'static,
    {
        Self {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            func: Box::new(func),
        }
    }
}

impl Router for FnRouter {
    fn targets(&self) -> &[String] {
        &self.targets
    }

    fn route(&self, state: &StateStore) -> String {
        (self.func)(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::underwrite::engine::state::StateUpdate;
    use serde_json::json;

    #[test]
    fn test_fn_router() {
        let router = FnRouter::new(&["yes", "no"], |state| {
            if state.get("flag") == Some(&json!(true)) {
                "yes".to_string()
            } else {
                "no".to_string()
            }
        });

        let mut state = StateStore::new();
        assert_eq!(router.route(&state), "no");
        state.merge(StateUpdate::new().with("flag", json!(true)));
        assert_eq!(router.route(&state), "yes");
        assert_eq!(router.targets(), &["yes".to_string(), "no".to_string()]);
    }
}
