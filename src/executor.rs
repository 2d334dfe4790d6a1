// Effect executors
//
// One strategy per effect kind. Every executor settles its continuation exactly once,
// either before returning or later from a channel publish, a spawned future, or a
// joined task settling.

use std::rc::Rc;

use futures::future::LocalFutureObj;
use tracing::{debug, trace};

use crate::channel::Channel;
use crate::effect::{Completion, Effect, Invocation, Pattern, Reply, Selector, Spawn};
use crate::env::{Environment, Host};
use crate::error::SagaError;
use crate::task::{Continuation, Task, TaskHandle, TaskId};

pub(crate) fn execute<H: Host>(
    env: &Rc<Environment<H>>,
    task: TaskId,
    effect: Effect<H>,
    cont: Continuation<H>,
) {
    match effect {
        Effect::Take { channel, pattern } => run_take(env, channel, pattern, cont),
        Effect::Put(action) => run_put(env, action, cont),
        Effect::Call(invocation) => run_call(env, invocation, cont),
        Effect::Fork(spawn) => run_fork(env, task, spawn, cont),
        Effect::Select(selector) => run_select(env, selector, cont),
        Effect::Join(handle) => run_join(handle, cont),
    }
}

fn run_take<H: Host>(
    env: &Rc<Environment<H>>,
    channel: Option<Rc<Channel<H::Action>>>,
    pattern: Pattern<H::Action>,
    cont: Continuation<H>,
) {
    trace!(task = %cont.task_id(), ?pattern, "take: waiting");
    let channel = channel.unwrap_or_else(|| Rc::clone(env.channel()));
    channel.register_matcher(pattern.into_matcher(), move |action| {
        cont.succeed(Reply::Action(action));
    });
}

fn run_put<H: Host>(env: &Rc<Environment<H>>, action: H::Action, cont: Continuation<H>) {
    trace!(task = %cont.task_id(), ?action, "put");
    match env.dispatch(action) {
        Ok(dispatched) => cont.succeed(Reply::Action(dispatched)),
        Err(error) => {
            debug!(task = %cont.task_id(), %error, "put: dispatch failed");
            cont.fail(error);
        }
    }
}

fn run_call<H: Host>(env: &Rc<Environment<H>>, invocation: Invocation, cont: Continuation<H>) {
    match invocation.invoke() {
        Completion::Ready(result) => {
            trace!(task = %cont.task_id(), ok = result.is_ok(), "call: settled synchronously");
            cont.resume(result.map(Reply::Value));
        }
        Completion::Deferred(future) => {
            trace!(task = %cont.task_id(), "call: deferred");
            let waiting = cont.clone();
            let settle = async move {
                let result = future.await;
                trace!(task = %waiting.task_id(), ok = result.is_ok(), "call: deferred settled");
                waiting.resume(result.map(Reply::Value));
            };
            if let Err(error) = env.spawn_local(LocalFutureObj::new(Box::new(settle))) {
                cont.fail(SagaError::Spawn(error.to_string()));
            }
        }
    }
}

fn run_fork<H: Host>(
    env: &Rc<Environment<H>>,
    parent: TaskId,
    spawn: Spawn<H>,
    cont: Continuation<H>,
) {
    let child = Task::spawn_child(env, spawn.build(), parent);
    trace!(task = %parent, child = %child.id(), "fork");
    cont.succeed(Reply::Task(child));
}

fn run_select<H: Host>(env: &Rc<Environment<H>>, selector: Selector<H::State>, cont: Continuation<H>) {
    let state = env.get_state();
    cont.succeed(Reply::Value(selector(&state)));
}

fn run_join<H: Host>(handle: TaskHandle, cont: Continuation<H>) {
    trace!(task = %cont.task_id(), joined = %handle.id(), "join");
    handle.on_settle(move |outcome| match outcome {
        Ok(value) => cont.succeed(Reply::Value(value.clone())),
        Err(error) => cont.fail(error.clone()),
    });
}
