// Task driver
//
// A task owns one saga and the resumption loop around it. Each yielded effect is
// handed to its executor together with a guarded one-shot continuation; settling
// that continuation resumes the saga.
//
// Executors may settle synchronously, from inside `execute`. Such results are parked
// on the continuation's slot and picked up by the loop in `drive`, so runs of
// synchronous effects iterate instead of recursing.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::channel::oneshot;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::effect::{Reply, Resume};
use crate::env::{Environment, Host};
use crate::error::SagaError;
use crate::executor;
use crate::saga::{Saga, Step};

/// Identifier of a task, unique within one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(id: u64) -> Self {
        TaskId(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a task as seen from outside the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    /// Inside the driver loop.
    Running,
    /// Waiting on an effect.
    Suspended,
    Done(Value),
    Failed(SagaError),
}

impl TaskStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, TaskStatus::Done(_) | TaskStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lineage {
    Root,
    Child { parent: TaskId },
}

type Watcher = Box<dyn FnOnce(&Result<Value, SagaError>)>;

struct TaskState {
    id: TaskId,
    lineage: Lineage,
    status: RefCell<TaskStatus>,
    watchers: RefCell<Vec<Watcher>>,
}

/// Shared view of a task: its status and a way to wait for its outcome.
#[derive(Clone)]
pub struct TaskHandle(Rc<TaskState>);

impl TaskHandle {
    fn new(id: TaskId, lineage: Lineage) -> Self {
        TaskHandle(Rc::new(TaskState {
            id,
            lineage,
            status: RefCell::new(TaskStatus::Running),
            watchers: RefCell::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> TaskId {
        self.0.id
    }

    /// Task that forked this one, if any.
    pub fn parent(&self) -> Option<TaskId> {
        match self.0.lineage {
            Lineage::Root => None,
            Lineage::Child { parent } => Some(parent),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.0.status.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.0.status.borrow().is_settled()
    }

    /// Run `f` with the task's outcome once it settles; immediately if it already has.
    pub fn on_settle(&self, f: impl FnOnce(&Result<Value, SagaError>) + 'static) {
        let outcome = match &*self.0.status.borrow() {
            TaskStatus::Done(value) => Some(Ok(value.clone())),
            TaskStatus::Failed(error) => Some(Err(error.clone())),
            _ => None,
        };
        match outcome {
            Some(outcome) => f(&outcome),
            None => self.0.watchers.borrow_mut().push(Box::new(f)),
        }
    }

    /// Resolves with the task's outcome. Resolves to `SagaError::Abandoned` if the
    /// task is dropped while still suspended.
    pub fn join(&self) -> impl Future<Output = Result<Value, SagaError>> {
        let (tx, rx) = oneshot::channel();
        self.on_settle(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        let id = self.id();
        async move { rx.await.unwrap_or(Err(SagaError::Abandoned(id))) }
    }

    fn set_status(&self, status: TaskStatus) {
        *self.0.status.borrow_mut() = status;
    }

    fn settle(&self, outcome: Result<Value, SagaError>) {
        self.set_status(match &outcome {
            Ok(value) => TaskStatus::Done(value.clone()),
            Err(error) => TaskStatus::Failed(error.clone()),
        });
        let watchers = std::mem::take(&mut *self.0.watchers.borrow_mut());
        for watcher in watchers {
            watcher(&outcome);
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.0.id)
            .field("lineage", &self.0.lineage)
            .field("status", &*self.0.status.borrow())
            .finish()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

pub(crate) struct Task<H: Host> {
    handle: TaskHandle,
    env: Rc<Environment<H>>,
    saga: RefCell<Option<Box<dyn Saga<H>>>>,
}

impl<H: Host> Task<H> {
    pub(crate) fn spawn_root(env: &Rc<Environment<H>>, saga: Box<dyn Saga<H>>) -> TaskHandle {
        Self::start(env, saga, Lineage::Root)
    }

    pub(crate) fn spawn_child(
        env: &Rc<Environment<H>>,
        saga: Box<dyn Saga<H>>,
        parent: TaskId,
    ) -> TaskHandle {
        Self::start(env, saga, Lineage::Child { parent })
    }

    /// Drive a new task up to its first suspension point (or completion).
    fn start(env: &Rc<Environment<H>>, saga: Box<dyn Saga<H>>, lineage: Lineage) -> TaskHandle {
        let handle = TaskHandle::new(env.next_task_id(), lineage);
        debug!(task = %handle.id(), ?lineage, "task started");
        let task = Rc::new(Task {
            handle: handle.clone(),
            env: Rc::clone(env),
            saga: RefCell::new(Some(saga)),
        });
        task.drive(Ok(Reply::Empty));
        handle
    }

    pub(crate) fn id(&self) -> TaskId {
        self.handle.id()
    }

    fn drive(self: &Rc<Self>, mut input: Resume<H::Action>) {
        let limit = self.env.config().max_sync_steps;
        let mut steps = 0usize;

        loop {
            steps += 1;
            if let Some(limit) = limit {
                if steps > limit {
                    self.finish(Err(SagaError::StepLimit {
                        task: self.id(),
                        limit,
                    }));
                    return;
                }
            }

            let step = {
                let Ok(mut slot) = self.saga.try_borrow_mut() else {
                    error!(task = %self.id(), "saga resumed while already running");
                    return;
                };
                let Some(saga) = slot.as_mut() else {
                    trace!(task = %self.id(), "resumption after settlement ignored");
                    return;
                };
                if steps == 1 {
                    self.handle.set_status(TaskStatus::Running);
                }
                saga.resume(input)
            };

            match step {
                Step::Done(value) => {
                    self.finish(Ok(value));
                    return;
                }
                Step::Failed(error) => {
                    self.finish(Err(error));
                    return;
                }
                Step::Pass => input = Ok(Reply::Empty),
                Step::Yield(effect) => {
                    if self.env.config().log_effects {
                        debug!(task = %self.id(), effect = ?effect, "effect");
                    } else {
                        trace!(task = %self.id(), kind = %effect.kind(), "effect");
                    }

                    let slot = Rc::new(Slot::new());
                    let continuation = Continuation {
                        task: Rc::clone(self),
                        slot: Rc::clone(&slot),
                    };
                    executor::execute(&self.env, self.id(), effect, continuation);

                    match slot.leave_inline() {
                        Some(next) => input = next,
                        None => {
                            self.handle.set_status(TaskStatus::Suspended);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn finish(&self, outcome: Result<Value, SagaError>) {
        // Drop the saga first so whatever it owns is released before watchers run.
        if let Ok(mut slot) = self.saga.try_borrow_mut() {
            slot.take();
        }

        match (&outcome, self.handle.0.lineage) {
            (Ok(_), _) => debug!(task = %self.id(), "task done"),
            (Err(e), Lineage::Root) => error!(task = %self.id(), error = %e, "root task failed"),
            (Err(e), Lineage::Child { parent }) => warn!(
                task = %self.id(),
                %parent,
                error = %e,
                "forked task failed"
            ),
        }
        self.handle.settle(outcome);
    }
}

struct Slot<A> {
    settled: Cell<bool>,
    inline: Cell<bool>,
    parked: RefCell<Option<Resume<A>>>,
}

impl<A> Slot<A> {
    fn new() -> Self {
        Self {
            settled: Cell::new(false),
            inline: Cell::new(true),
            parked: RefCell::new(None),
        }
    }

    /// Called once the executor returns; yields a result settled during `execute`.
    fn leave_inline(&self) -> Option<Resume<A>> {
        self.inline.set(false);
        self.parked.borrow_mut().take()
    }
}

/// One-shot resumption of the task waiting on an effect.
///
/// Clones share one settlement guard: only the first `resume` across all clones has
/// any effect.
pub struct Continuation<H: Host> {
    task: Rc<Task<H>>,
    slot: Rc<Slot<H::Action>>,
}

impl<H: Host> Continuation<H> {
    pub fn task_id(&self) -> TaskId {
        self.task.id()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.settled.get()
    }

    pub fn resume(&self, result: Resume<H::Action>) {
        if self.slot.settled.replace(true) {
            debug!(task = %self.task.id(), "duplicate settlement ignored");
            return;
        }
        if self.slot.inline.get() {
            *self.slot.parked.borrow_mut() = Some(result);
            return;
        }
        self.task.drive(result);
    }

    pub fn succeed(&self, reply: Reply<H::Action>) {
        self.resume(Ok(reply));
    }

    pub fn fail(&self, error: SagaError) {
        self.resume(Err(error));
    }
}

impl<H: Host> Clone for Continuation<H> {
    fn clone(&self) -> Self {
        Self {
            task: Rc::clone(&self.task),
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<H: Host> fmt::Debug for Continuation<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("task", &self.task.id())
            .field("settled", &self.slot.settled.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::config::RuntimeConfig;
    use crate::effect::{AnyAction, Effect};
    use crate::runtime::SagaMiddleware;
    use crate::saga::from_fn;
    use crate::testing::{middleware, LogHost};
    use futures::executor::{block_on, LocalPool};
    use serde_json::json;

    type H = Rc<LogHost>;

    #[test]
    fn test_guarded_continuation_settles_once() {
        let (mw, _host, _pool) = middleware(LogHost::default());
        let resumes = Rc::new(Cell::new(0));
        let counter = Rc::clone(&resumes);
        let saga = from_fn::<H, _>(move |_| {
            counter.set(counter.get() + 1);
            Step::Yield(Effect::take("NEVER"))
        });
        let task = Rc::new(Task {
            handle: TaskHandle::new(TaskId::new(99), Lineage::Root),
            env: Rc::clone(mw.environment()),
            saga: RefCell::new(Some(Box::new(saga) as Box<dyn Saga<H>>)),
        });
        let slot = Rc::new(Slot::new());
        slot.leave_inline();
        let cont = Continuation { task, slot };
        let twin = cont.clone();

        cont.succeed(Reply::Empty);
        twin.fail(SagaError::failed("late"));

        assert_eq!(resumes.get(), 1);
        assert!(twin.is_settled());
    }

    #[test]
    fn test_late_resumption_keeps_settled_status() {
        let (mw, _host, _pool) = middleware(LogHost::default());
        let handle = TaskHandle::new(TaskId::new(7), Lineage::Root);
        handle.settle(Ok(json!("done")));
        let task = Rc::new(Task {
            handle: handle.clone(),
            env: Rc::clone(mw.environment()),
            saga: RefCell::new(None),
        });
        let slot = Rc::new(Slot::new());
        slot.leave_inline();
        let cont = Continuation { task, slot };

        cont.succeed(Reply::Empty);

        assert_eq!(handle.status(), TaskStatus::Done(json!("done")));
    }

    #[test]
    fn test_status_follows_suspension() {
        let (mw, _host, _pool) = middleware(LogHost::default());
        let mut waiting = false;
        let handle = mw.start(from_fn::<H, _>(move |input| {
            if !waiting {
                waiting = true;
                return Step::Yield(Effect::take("GO"));
            }
            match input.map(|reply| reply.into_action()) {
                Ok(Some(action)) => Step::Done(json!(action.kind)),
                _ => Step::Failed(SagaError::failed("expected GO")),
            }
        }));

        assert_eq!(handle.status(), TaskStatus::Suspended);
        assert_eq!(handle.parent(), None);

        mw.dispatch(AnyAction::new("GO")).unwrap();
        assert_eq!(handle.status(), TaskStatus::Done(json!("GO")));
        assert_eq!(block_on(handle.join()), Ok(json!("GO")));
    }

    #[test]
    fn test_long_synchronous_run_iterates() {
        let (mw, host, _pool) = middleware(LogHost::default());
        let mut remaining = 100_000;
        let handle = mw.start(from_fn::<H, _>(move |_| {
            if remaining == 0 {
                return Step::Done(json!("finished"));
            }
            remaining -= 1;
            Step::Yield(Effect::put(AnyAction::new("TICK")))
        }));

        assert_eq!(handle.status(), TaskStatus::Done(json!("finished")));
        assert_eq!(host.dispatched.borrow().len(), 100_000);
    }

    #[test]
    fn test_pass_resumes_with_empty() {
        let (mw, _host, _pool) = middleware(LogHost::default());
        let mut passed = false;
        let handle = mw.start(from_fn::<H, _>(move |input| {
            if !passed {
                passed = true;
                return Step::Pass;
            }
            match input {
                Ok(Reply::Empty) => Step::Done(json!(true)),
                _ => Step::Done(json!(false)),
            }
        }));
        assert_eq!(handle.status(), TaskStatus::Done(json!(true)));
    }

    #[test]
    fn test_step_limit_fails_task() {
        let pool = LocalPool::new();
        let mw = SagaMiddleware::with_config(
            Rc::new(LogHost::default()),
            pool.spawner(),
            RuntimeConfig::default().with_max_sync_steps(10),
        );
        let handle = mw.start(from_fn::<H, _>(|_| Step::Pass));

        assert_eq!(
            handle.status(),
            TaskStatus::Failed(SagaError::StepLimit {
                task: handle.id(),
                limit: 10,
            })
        );
    }

    #[test]
    fn test_join_abandoned_task() {
        let (mw, _host, _pool) = middleware(LogHost::default());
        let channel = Rc::new(Channel::new());
        let mut source = Some(Rc::clone(&channel));
        let handle = mw.start(from_fn::<H, _>(move |_| match source.take() {
            Some(channel) => Step::Yield(Effect::take_from(channel, "*")),
            None => Step::Done(Value::Null),
        }));
        let id = handle.id();
        let outcome = handle.join();

        drop(handle);
        drop(channel);

        assert_eq!(block_on(outcome), Err(SagaError::Abandoned(id)));
    }
}
