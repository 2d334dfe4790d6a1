//! Effect-based cooperative saga runtime
//!
//! Application logic is written as *sagas*: step functions that never perform side
//! effects themselves but yield declarative intents ([`Effect`]s) such as "wait for an
//! action", "dispatch an action", "call a function" or "fork a child saga". The
//! runtime interprets each intent, and resumes the saga with the result once it is
//! available.
//!
//! All tasks run on a single cooperative execution context. Tasks interleave only at
//! suspension points (a `Take` waiting on the channel, or a `Call` waiting on a
//! deferred value), so no locking is needed anywhere in the runtime.
//!
//! ```ignore
//! let middleware = SagaMiddleware::new(store, pool.spawner());
//! let root = middleware.start(take_every("LOGIN", LoginHandler::new));
//! middleware.dispatch(AnyAction::new("LOGIN"))?;
//! pool.run_until_stalled();
//! ```

pub mod channel;
pub mod config;
pub mod effect;
pub mod env;
pub mod error;
mod executor;
pub mod runtime;
pub mod saga;
pub mod task;

#[cfg(test)]
mod testing;

pub use channel::{Channel, Matcher};
pub use config::RuntimeConfig;
pub use effect::{
    Action, AnyAction, Completion, Effect, EffectKind, Invocation, Pattern, Reply, Resume,
    Selector, Spawn,
};
pub use env::{Environment, Host};
#[cfg(not(target_arch = "wasm32"))]
pub use env::TokioSpawner;
pub use error::{Result, SagaError};
pub use runtime::SagaMiddleware;
pub use saga::{from_fn, take_every, FromFn, Saga, Step, TakeEvery};
pub use task::{Continuation, TaskHandle, TaskId, TaskStatus};

/// Opaque payload carried by call results, rejection reasons and task outcomes.
pub use serde_json::Value;
