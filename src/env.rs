// Execution environment shared by every task of one middleware instance
//
// The environment bundles the host state container, the action channel and the
// spawner used to drive deferred call completions. It is passed to every executor
// and inherited by every forked task.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalFutureObj;
use futures::task::{LocalSpawn, SpawnError};

use crate::channel::Channel;
use crate::config::RuntimeConfig;
use crate::effect::Action;
use crate::error::Result;
use crate::task::TaskId;

/// The state container sagas run against.
///
/// `dispatch` must notify the host's own subscribers synchronously before it returns
/// and must tolerate being re-entered from inside one of those notifications.
pub trait Host: 'static {
    type State;
    type Action: Action;

    /// Current state snapshot.
    fn get_state(&self) -> Self::State;

    /// Apply an action. Returns the dispatched action, as the host saw it.
    fn dispatch(&self, action: Self::Action) -> Result<Self::Action>;
}

impl<H: Host> Host for Rc<H> {
    type State = H::State;
    type Action = H::Action;

    fn get_state(&self) -> Self::State {
        (**self).get_state()
    }

    fn dispatch(&self, action: Self::Action) -> Result<Self::Action> {
        (**self).dispatch(action)
    }
}

/// Shared, read-mostly context of one runtime instance.
pub struct Environment<H: Host> {
    host: H,
    channel: Rc<Channel<H::Action>>,
    spawner: Rc<dyn LocalSpawn>,
    config: RuntimeConfig,
    next_task: Cell<u64>,
}

impl<H: Host> Environment<H> {
    pub fn new(host: H, spawner: Rc<dyn LocalSpawn>, config: RuntimeConfig) -> Self {
        Self {
            host,
            channel: Rc::new(Channel::new()),
            spawner,
            config,
            next_task: Cell::new(0),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn channel(&self) -> &Rc<Channel<H::Action>> {
        &self.channel
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn get_state(&self) -> H::State {
        self.host.get_state()
    }

    /// Dispatch into the host, then publish the action to every pending `Take`.
    ///
    /// Waiters fire before this returns, so an action put by one task is observed by
    /// the tasks already waiting for it before the putting task resumes.
    pub fn dispatch(&self, action: H::Action) -> Result<H::Action> {
        let result = self.host.dispatch(action.clone())?;
        let fired = self.channel.publish(&action);
        tracing::trace!(action = ?action, fired, "published");
        Ok(result)
    }

    pub(crate) fn spawn_local(
        &self,
        future: LocalFutureObj<'static, ()>,
    ) -> std::result::Result<(), SpawnError> {
        self.spawner.spawn_local_obj(future)
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        let id = self.next_task.get();
        self.next_task.set(id + 1);
        TaskId::new(id)
    }
}

impl<H: Host> fmt::Debug for Environment<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("channel", &self.channel)
            .field("config", &self.config)
            .field("tasks_started", &self.next_task.get())
            .finish()
    }
}

/// Spawner for deferred completions on the current tokio `LocalSet`.
///
/// Must only be used from inside `LocalSet::run_until` / `LocalSet::block_on`.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

#[cfg(not(target_arch = "wasm32"))]
impl LocalSpawn for TokioSpawner {
    fn spawn_local_obj(
        &self,
        future: LocalFutureObj<'static, ()>,
    ) -> std::result::Result<(), SpawnError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(SpawnError::shutdown());
        }
        tokio::task::spawn_local(future);
        Ok(())
    }
}
