// Reducer-driven state container
//
// State is only borrowed while the reducer runs, and listeners are notified from a
// snapshot of the listener list, so dispatch may be re-entered from a listener.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use sagaflow::{Action, Host, Result};

type Reducer<S, A> = Box<dyn Fn(&S, &A) -> S>;
type Listener = Rc<dyn Fn()>;

/// Handle returned by [`Store::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

pub struct Store<S, A> {
    state: RefCell<S>,
    reducer: Reducer<S, A>,
    listeners: RefCell<Vec<(Subscription, Listener)>>,
    next_listener: Cell<u64>,
}

impl<S: Clone, A: Action> Store<S, A> {
    pub fn new(initial: S, reducer: impl Fn(&S, &A) -> S + 'static) -> Self {
        Self {
            state: RefCell::new(initial),
            reducer: Box::new(reducer),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        }
    }

    pub fn state(&self) -> S {
        self.state.borrow().clone()
    }

    /// Register a listener called after every dispatch.
    pub fn subscribe(&self, listener: impl Fn() + 'static) -> Subscription {
        let id = Subscription(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription);
        listeners.len() != before
    }

    fn reduce(&self, action: &A) {
        let next = {
            let state = self.state.borrow();
            (self.reducer)(&*state, action)
        };
        *self.state.borrow_mut() = next;
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl<S: Clone + 'static, A: Action> Host for Store<S, A> {
    type State = S;
    type Action = A;

    fn get_state(&self) -> S {
        self.state()
    }

    fn dispatch(&self, action: A) -> Result<A> {
        tracing::trace!(action = ?action, "store: reduce");
        self.reduce(&action);
        self.notify();
        Ok(action)
    }
}

impl<S: fmt::Debug, A> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.state.borrow())
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagaflow::AnyAction;

    fn counter() -> Store<i64, AnyAction> {
        Store::new(0, |state: &i64, action: &AnyAction| match action.kind.as_str() {
            "ADD" => state + 1,
            "MINUS" => state - 1,
            _ => *state,
        })
    }

    #[test]
    fn test_reducer_applies_actions() {
        let store = counter();
        store.dispatch(AnyAction::new("ADD")).unwrap();
        store.dispatch(AnyAction::new("ADD")).unwrap();
        store.dispatch(AnyAction::new("MINUS")).unwrap();
        store.dispatch(AnyAction::new("UNKNOWN")).unwrap();
        assert_eq!(store.get_state(), 1);
    }

    #[test]
    fn test_listeners_and_unsubscribe() {
        let store = counter();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let subscription = store.subscribe(move || seen.set(seen.get() + 1));

        store.dispatch(AnyAction::new("ADD")).unwrap();
        assert_eq!(calls.get(), 1);

        assert!(store.unsubscribe(subscription));
        assert!(!store.unsubscribe(subscription));
        store.dispatch(AnyAction::new("ADD")).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_dispatch_reentered_from_listener() {
        let store = Rc::new(counter());
        let inner = Rc::downgrade(&store);
        store.subscribe(move || {
            if let Some(store) = inner.upgrade() {
                if store.state() < 3 {
                    store.dispatch(AnyAction::new("ADD")).unwrap();
                }
            }
        });

        store.dispatch(AnyAction::new("ADD")).unwrap();
        assert_eq!(store.state(), 3);
    }
}
