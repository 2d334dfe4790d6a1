// Saga middleware: the entry point tying a host to the runtime

use std::rc::Rc;

use futures::task::LocalSpawn;
use tracing::debug;

use crate::channel::Channel;
use crate::config::RuntimeConfig;
use crate::env::{Environment, Host};
use crate::error::Result;
use crate::saga::Saga;
use crate::task::{Task, TaskHandle};

/// Runs sagas against a host and routes every dispatch through the action channel.
///
/// Actions dispatched from outside the sagas must go through [`SagaMiddleware::dispatch`]
/// (not the host directly) for pending `Take`s to observe them.
///
/// Dropping the middleware abandons every task still waiting on its channel.
pub struct SagaMiddleware<H: Host> {
    env: Rc<Environment<H>>,
}

impl<H: Host> SagaMiddleware<H> {
    pub fn new(host: H, spawner: impl LocalSpawn + 'static) -> Self {
        Self::with_config(host, spawner, RuntimeConfig::default())
    }

    pub fn with_config(host: H, spawner: impl LocalSpawn + 'static, config: RuntimeConfig) -> Self {
        Self {
            env: Rc::new(Environment::new(host, Rc::new(spawner), config)),
        }
    }

    /// Start a root task from a saga factory and its arguments. The task runs up to
    /// its first suspension point before this returns.
    pub fn run<F, Args, S>(&self, factory: F, args: Args) -> TaskHandle
    where
        F: FnOnce(Args) -> S,
        S: Saga<H> + 'static,
    {
        self.start(factory(args))
    }

    /// Start a root task from an already constructed saga.
    pub fn start<S>(&self, saga: S) -> TaskHandle
    where
        S: Saga<H> + 'static,
    {
        Task::spawn_root(&self.env, Box::new(saga))
    }

    /// Dispatch into the host and publish the action to waiting sagas.
    pub fn dispatch(&self, action: H::Action) -> Result<H::Action> {
        self.env.dispatch(action)
    }

    pub fn get_state(&self) -> H::State {
        self.env.get_state()
    }

    pub fn host(&self) -> &H {
        self.env.host()
    }

    pub fn channel(&self) -> &Rc<Channel<H::Action>> {
        self.env.channel()
    }

    pub fn environment(&self) -> &Rc<Environment<H>> {
        &self.env
    }
}

impl<H: Host> Drop for SagaMiddleware<H> {
    fn drop(&mut self) {
        // Waiters hold their tasks, and tasks hold the environment.
        let abandoned = self.env.channel().clear();
        if abandoned > 0 {
            debug!(abandoned, "middleware dropped with pending takes");
        }
    }
}
