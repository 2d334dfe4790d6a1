// Action channel
//
// Pending waiters are matched against published events in registration order.
// A waiter is removed when it fires; it must register again to see later events.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Predicate deciding whether a waiter accepts an event.
pub type Matcher<A> = Rc<dyn Fn(&A) -> bool>;

struct Waiter<A> {
    matcher: Matcher<A>,
    continuation: Box<dyn FnOnce(A)>,
}

/// In-memory publish/subscribe registry of one-shot waiters.
pub struct Channel<A> {
    waiters: RefCell<BTreeMap<u64, Waiter<A>>>,
    next_seq: Cell<u64>,
}

impl<A> Channel<A> {
    pub fn new() -> Self {
        Self {
            waiters: RefCell::new(BTreeMap::new()),
            next_seq: Cell::new(0),
        }
    }

    /// Append a waiter. `continuation` runs at most once, on the first published
    /// event accepted by `matcher`.
    pub fn register<M, F>(&self, matcher: M, continuation: F)
    where
        M: Fn(&A) -> bool + 'static,
        F: FnOnce(A) + 'static,
    {
        self.register_matcher(Rc::new(matcher), continuation);
    }

    pub fn register_matcher<F>(&self, matcher: Matcher<A>, continuation: F)
    where
        F: FnOnce(A) + 'static,
    {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.waiters.borrow_mut().insert(
            seq,
            Waiter {
                matcher,
                continuation: Box::new(continuation),
            },
        );
    }

    /// Number of waiters that have not fired yet.
    pub fn len(&self) -> usize {
        self.waiters.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.borrow().is_empty()
    }

    /// Drop every pending waiter without firing it. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut *self.waiters.borrow_mut());
        dropped.len()
    }
}

impl<A: Clone> Channel<A> {
    /// Fire every waiter registered before this call whose matcher accepts `event`,
    /// in registration order. Returns how many fired.
    ///
    /// Continuations run with no borrow of the channel held, so they may register
    /// new waiters or publish again. Waiters registered during this call are not
    /// visited by it.
    pub fn publish(&self, event: &A) -> usize {
        let horizon = self.next_seq.get();
        let mut cursor = 0;
        let mut fired = 0;

        loop {
            let candidate = self
                .waiters
                .borrow()
                .range(cursor..horizon)
                .next()
                .map(|(seq, w)| (*seq, Rc::clone(&w.matcher)));
            let Some((seq, matcher)) = candidate else {
                break;
            };
            cursor = seq + 1;

            if !matcher(event) {
                continue;
            }

            // A nested publish may already have consumed this waiter.
            let waiter = self.waiters.borrow_mut().remove(&seq);
            if let Some(waiter) = waiter {
                fired += 1;
                (waiter.continuation)(event.clone());
            }
        }

        fired
    }
}

impl<A> Default for Channel<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Channel<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn log() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_publish_matches_only_pattern() {
        let channel = Channel::new();
        let seen = log();
        let sink = Rc::clone(&seen);
        channel.register(
            |event: &&str| *event == "LOGOUT",
            move |event| sink.borrow_mut().push(event.to_string()),
        );

        assert_eq!(channel.publish(&"LOGIN"), 0);
        assert!(seen.borrow().is_empty());

        assert_eq!(channel.publish(&"LOGOUT"), 1);
        assert_eq!(*seen.borrow(), vec!["LOGOUT".to_string()]);
    }

    #[test]
    fn test_fired_waiter_is_removed() {
        let channel = Channel::new();
        let seen = log();
        let sink = Rc::clone(&seen);
        channel.register(|_: &&str| true, move |e| sink.borrow_mut().push(e.to_string()));

        channel.publish(&"A");
        channel.publish(&"B");
        assert_eq!(*seen.borrow(), vec!["A".to_string()]);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_registration_order() {
        let channel = Channel::new();
        let seen = log();
        for name in ["first", "second", "third"] {
            let sink = Rc::clone(&seen);
            channel.register(|_: &u8| true, move |_| sink.borrow_mut().push(name.into()));
        }
        channel.publish(&0);
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_reentrant_registration_not_visited() {
        let channel = Rc::new(Channel::new());
        let hits = Rc::new(Cell::new(0));

        let inner_channel = Rc::clone(&channel);
        let inner_hits = Rc::clone(&hits);
        channel.register(
            |_: &u8| true,
            move |_| {
                inner_hits.set(inner_hits.get() + 1);
                let again = Rc::clone(&inner_hits);
                inner_channel.register(|_: &u8| true, move |_| again.set(again.get() + 1));
            },
        );

        assert_eq!(channel.publish(&1), 1);
        assert_eq!(hits.get(), 1);
        assert_eq!(channel.len(), 1);

        assert_eq!(channel.publish(&2), 1);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_nested_publish_consumes_waiter_once() {
        let channel = Rc::new(Channel::new());
        let hits = Rc::new(Cell::new(0));

        let nested = Rc::clone(&channel);
        channel.register(|_: &u8| true, move |_| {
            nested.publish(&9);
        });
        let counter = Rc::clone(&hits);
        channel.register(|_: &u8| true, move |_| counter.set(counter.get() + 1));

        channel.publish(&1);
        assert_eq!(hits.get(), 1);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_publish_with_many_pending_waiters() {
        let channel = Channel::new();
        let hits = Rc::new(Cell::new(0));
        for n in 0..50_000u32 {
            let counter = Rc::clone(&hits);
            channel.register(move |e: &u32| *e == n % 1_000, move |_| {
                counter.set(counter.get() + 1)
            });
        }

        for _ in 0..20 {
            assert_eq!(channel.publish(&u32::MAX), 0);
        }
        assert_eq!(channel.publish(&7), 50);
        assert_eq!(hits.get(), 50);
        assert_eq!(channel.len(), 50_000 - 50);
    }

    #[test]
    fn test_clear_drops_waiters_unfired() {
        let channel = Channel::new();
        let owned = Rc::new(());
        let held = Rc::clone(&owned);
        channel.register(|_: &u8| true, move |_| drop(held));

        assert_eq!(channel.clear(), 1);
        assert!(channel.is_empty());
        assert_eq!(Rc::strong_count(&owned), 1);
        assert_eq!(channel.publish(&0), 0);
    }

    proptest! {
        #[test]
        fn prop_publish_fires_exactly_matching_in_order(
            patterns in proptest::collection::vec(0u8..4, 0..16),
            event in 0u8..4,
        ) {
            let channel = Channel::new();
            let fired = Rc::new(RefCell::new(Vec::new()));
            for (index, pattern) in patterns.iter().copied().enumerate() {
                let sink = Rc::clone(&fired);
                channel.register(move |e: &u8| *e == pattern, move |_| sink.borrow_mut().push(index));
            }

            let count = channel.publish(&event);

            let expected: Vec<usize> = patterns
                .iter()
                .enumerate()
                .filter(|(_, p)| **p == event)
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(count, expected.len());
            prop_assert_eq!(&*fired.borrow(), &expected);
            prop_assert_eq!(channel.len(), patterns.len() - expected.len());
        }
    }
}
