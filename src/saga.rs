// Suspendable computations
//
// A saga is an explicit step function. Each call to `resume` feeds it the result of
// its previous effect (or the failure to re-inject) and returns the next step. The
// task driver owns the resumption loop.

use std::fmt;

use serde_json::Value;

use crate::effect::{Effect, Pattern, Reply, Resume};
use crate::env::Host;
use crate::error::SagaError;

/// What a saga does next.
pub enum Step<H: Host> {
    /// Suspend on an effect and resume with its result.
    Yield(Effect<H>),
    /// A yield that carries no effect; resumed immediately with `Reply::Empty`.
    Pass,
    /// Terminated successfully.
    Done(Value),
    /// Terminated with an unhandled failure.
    Failed(SagaError),
}

impl<H: Host> fmt::Debug for Step<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Yield(effect) => f.debug_tuple("Yield").field(effect).finish(),
            Step::Pass => f.write_str("Pass"),
            Step::Done(value) => f.debug_tuple("Done").field(value).finish(),
            Step::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

/// A resumable computation producing effects for host `H`.
///
/// The first `resume` receives `Ok(Reply::Empty)`. Each following call receives the
/// outcome of the effect last yielded; an `Err` is a failure raised at that point,
/// which the saga may handle or give up on by returning `Step::Failed`.
pub trait Saga<H: Host> {
    fn resume(&mut self, input: Resume<H::Action>) -> Step<H>;
}

impl<H: Host, S: Saga<H> + ?Sized> Saga<H> for Box<S> {
    fn resume(&mut self, input: Resume<H::Action>) -> Step<H> {
        (**self).resume(input)
    }
}

/// Saga backed by a step closure.
pub struct FromFn<F>(F);

/// Build a saga from a closure called once per resumption.
pub fn from_fn<H, F>(f: F) -> FromFn<F>
where
    H: Host,
    F: FnMut(Resume<H::Action>) -> Step<H>,
{
    FromFn(f)
}

impl<H, F> Saga<H> for FromFn<F>
where
    H: Host,
    F: FnMut(Resume<H::Action>) -> Step<H>,
{
    fn resume(&mut self, input: Resume<H::Action>) -> Step<H> {
        (self.0)(input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Taking,
    Forking,
}

/// Watcher that forks a fresh worker for every matching action, forever.
pub struct TakeEvery<H: Host, F> {
    pattern: Pattern<H::Action>,
    factory: F,
    phase: Phase,
}

/// Loop `Take(pattern)` then `Fork(factory(action))`.
pub fn take_every<H, F, S>(pattern: impl Into<Pattern<H::Action>>, factory: F) -> TakeEvery<H, F>
where
    H: Host,
    F: FnMut(H::Action) -> S,
    S: Saga<H> + 'static,
{
    TakeEvery {
        pattern: pattern.into(),
        factory,
        phase: Phase::Taking,
    }
}

impl<H, F, S> Saga<H> for TakeEvery<H, F>
where
    H: Host,
    F: FnMut(H::Action) -> S,
    S: Saga<H> + 'static,
{
    fn resume(&mut self, input: Resume<H::Action>) -> Step<H> {
        let reply = match input {
            Ok(reply) => reply,
            Err(error) => return Step::Failed(error),
        };

        match (self.phase, reply) {
            (Phase::Forking, Reply::Action(action)) => {
                let worker = (self.factory)(action);
                self.phase = Phase::Taking;
                Step::Yield(Effect::fork(move |()| worker, ()))
            }
            (Phase::Forking, other) => Step::Failed(SagaError::failed(format!(
                "take_every expected an action, got {other:?}"
            ))),
            (Phase::Taking, _) => {
                self.phase = Phase::Forking;
                Step::Yield(Effect::take(self.pattern.clone()))
            }
        }
    }
}
