// Middleware layers for hosts
//
// Each layer wraps a host and is itself a host, so layers compose in any order and
// the runtime only ever sees the outermost one.

use std::cell::RefCell;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use sagaflow::{Action, Host, Pattern, Result, SagaError};
use tracing::{debug, trace, warn};

/// Tracing middleware that logs every dispatch and the state it produced
pub struct Trace<H> {
    inner: H,
    prefix: String,
}

impl<H> Trace<H> {
    pub fn new(inner: H) -> Self {
        Self::with_prefix(inner, "store")
    }

    pub fn with_prefix(inner: H, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H> Host for Trace<H>
where
    H: Host,
    H::State: Debug,
{
    type State = H::State;
    type Action = H::Action;

    fn get_state(&self) -> Self::State {
        self.inner.get_state()
    }

    fn dispatch(&self, action: Self::Action) -> Result<Self::Action> {
        let start = Instant::now();
        trace!(prefix = %self.prefix, ?action, "dispatch: start");
        let result = self.inner.dispatch(action);
        let duration = start.elapsed();
        match &result {
            Ok(action) => debug!(
                prefix = %self.prefix,
                action = action.action_type(),
                ?duration,
                next_state = ?self.inner.get_state(),
                "dispatch: applied"
            ),
            Err(e) => warn!(prefix = %self.prefix, ?duration, error = %e, "dispatch: failed"),
        }
        result
    }
}

/// Dispatch counting middleware
pub struct Metrics<H> {
    inner: H,
    dispatch_count: AtomicU64,
    error_count: AtomicU64,
}

impl<H> Metrics<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            dispatch_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: Host> Host for Metrics<H> {
    type State = H::State;
    type Action = H::Action;

    fn get_state(&self) -> Self::State {
        self.inner.get_state()
    }

    fn dispatch(&self, action: Self::Action) -> Result<Self::Action> {
        let result = self.inner.dispatch(action);
        if result.is_ok() {
            self.dispatch_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// Captures every action that reached the inner host, in dispatch order
pub struct Recording<H: Host> {
    inner: H,
    actions: RefCell<Vec<H::Action>>,
}

impl<H: Host> Recording<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            actions: RefCell::new(Vec::new()),
        }
    }

    pub fn actions(&self) -> Vec<H::Action> {
        self.actions.borrow().clone()
    }

    /// Types of the recorded actions.
    pub fn action_types(&self) -> Vec<String> {
        self.actions
            .borrow()
            .iter()
            .map(|a| a.action_type().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.actions.borrow_mut().clear();
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: Host> Host for Recording<H> {
    type State = H::State;
    type Action = H::Action;

    fn get_state(&self) -> Self::State {
        self.inner.get_state()
    }

    fn dispatch(&self, action: Self::Action) -> Result<Self::Action> {
        // Recorded before forwarding so nested dispatches from listeners land after it.
        self.actions.borrow_mut().push(action.clone());
        self.inner.dispatch(action)
    }
}

/// Fault injection middleware for testing: refuses actions matching a pattern
pub struct FaultInjection<H: Host> {
    inner: H,
    fail_on: Pattern<H::Action>,
}

impl<H: Host> FaultInjection<H> {
    pub fn new(inner: H, fail_on: impl Into<Pattern<H::Action>>) -> Self {
        Self {
            inner,
            fail_on: fail_on.into(),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: Host> Host for FaultInjection<H> {
    type State = H::State;
    type Action = H::Action;

    fn get_state(&self) -> Self::State {
        self.inner.get_state()
    }

    fn dispatch(&self, action: Self::Action) -> Result<Self::Action> {
        if self.fail_on.matches(&action) {
            return Err(SagaError::Dispatch(format!(
                "Injected fault for {}",
                action.action_type()
            )));
        }
        self.inner.dispatch(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use sagaflow::AnyAction;

    fn counter() -> Store<i64, AnyAction> {
        Store::new(0, |state: &i64, action: &AnyAction| match action.kind.as_str() {
            "ADD" => state + 1,
            _ => *state,
        })
    }

    #[test]
    fn test_layers_compose() {
        let host = Metrics::new(Recording::new(FaultInjection::new(Trace::new(counter()), "BOOM")));

        host.dispatch(AnyAction::new("ADD")).unwrap();
        assert!(host.dispatch(AnyAction::new("BOOM")).is_err());
        host.dispatch(AnyAction::new("ADD")).unwrap();

        assert_eq!(host.get_state(), 2);
        assert_eq!(host.dispatch_count(), 2);
        assert_eq!(host.error_count(), 1);
        assert_eq!(host.inner().action_types(), vec!["ADD", "BOOM", "ADD"]);
    }

    #[test]
    fn test_fault_injection_error() {
        let host = FaultInjection::new(counter(), "BOOM");
        let err = host.dispatch(AnyAction::new("BOOM")).unwrap_err();
        assert_eq!(err, SagaError::Dispatch("Injected fault for BOOM".into()));
        assert_eq!(host.get_state(), 0);
    }
}
