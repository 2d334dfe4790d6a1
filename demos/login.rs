// Demonstration of a saga-driven login workflow
//
// A watcher saga forks a handler for every LOGIN action. The handler marks the
// session as loading, calls two asynchronous services, and reports the outcome
// back into the store. Run with RUST_LOG=sagaflow=debug to see the task lifecycle.

use std::rc::Rc;
use std::time::Duration;

use sagaflow::{
    take_every, AnyAction, Completion, Effect, Resume, RuntimeConfig, Saga, SagaError,
    SagaMiddleware, Step, TokioSpawner, Value,
};
use sagaflow_store::{Metrics, Recording, Store, Trace};
use serde_json::json;
use tokio::task::LocalSet;

#[derive(Debug, Clone, Default)]
struct Session {
    loading: bool,
    logged_in: bool,
    user: Value,
    error: Value,
}

type Host = Rc<Metrics<Recording<Trace<Store<Session, AnyAction>>>>>;

fn reducer(state: &Session, action: &AnyAction) -> Session {
    match action.kind.as_str() {
        "REQUEST" => Session {
            loading: true,
            ..state.clone()
        },
        "LOGIN_SUCCESS" => Session {
            loading: false,
            logged_in: true,
            user: action.payload.clone(),
            error: Value::Null,
        },
        "LOGIN_FAILURE" => Session {
            error: action.payload.clone(),
            ..Session::default()
        },
        "LOGOUT" => Session::default(),
        _ => state.clone(),
    }
}

// Stand-ins for remote services
mod service {
    use super::*;

    pub fn login(credentials: Value) -> Completion {
        Completion::deferred(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if credentials["username"] == "xiaoming" {
                Ok(json!({"id": 123, "username": "xiaoming"}))
            } else {
                Err(SagaError::rejected(json!({"msg": "wrong username or password"})))
            }
        })
    }

    pub fn more_user_info(mut user: Value) -> Completion {
        Completion::deferred(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if user["id"] != 123 {
                return Err(SagaError::rejected(json!({"msg": "could not load details"})));
            }
            user["score"] = json!("100");
            Ok(user)
        })
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Start,
    Requested,
    LoggingIn,
    Enriching,
    Reporting,
}

struct LoginHandler {
    credentials: Value,
    stage: Stage,
}

impl LoginHandler {
    fn new(action: AnyAction) -> Self {
        Self {
            credentials: action.payload,
            stage: Stage::Start,
        }
    }
}

impl Saga<Host> for LoginHandler {
    fn resume(&mut self, input: Resume<AnyAction>) -> Step<Host> {
        match (self.stage, input) {
            (Stage::Start, _) => {
                self.stage = Stage::Requested;
                Step::Yield(Effect::put(AnyAction::new("REQUEST")))
            }
            (Stage::Requested, Ok(_)) => {
                self.stage = Stage::LoggingIn;
                Step::Yield(Effect::call(service::login, self.credentials.clone()))
            }
            (Stage::LoggingIn, Ok(reply)) => {
                self.stage = Stage::Enriching;
                let user = reply.into_value().unwrap_or(Value::Null);
                Step::Yield(Effect::call(service::more_user_info, user))
            }
            (Stage::Enriching, Ok(reply)) => {
                self.stage = Stage::Reporting;
                let user = reply.into_value().unwrap_or(Value::Null);
                Step::Yield(Effect::put(AnyAction::new("LOGIN_SUCCESS").with_payload(user)))
            }
            (Stage::LoggingIn | Stage::Enriching, Err(error)) => {
                self.stage = Stage::Reporting;
                let reason = error.reason().cloned().unwrap_or(Value::Null);
                Step::Yield(Effect::put(AnyAction::new("LOGIN_FAILURE").with_payload(reason)))
            }
            (Stage::Reporting, Ok(_)) => Step::Done(Value::Null),
            (_, Err(error)) => Step::Failed(error),
        }
    }
}

async fn attempt(middleware: &SagaMiddleware<Host>, username: &str) -> anyhow::Result<()> {
    println!("\n=== Logging in as {username} ===");
    middleware.dispatch(AnyAction::new("LOGIN").with_payload(json!({ "username": username })))?;
    println!("loading: {}", middleware.get_state().loading);

    tokio::time::sleep(Duration::from_millis(600)).await;

    let session = middleware.get_state();
    if session.logged_in {
        println!("logged in: {}", session.user);
    } else {
        println!("login failed: {}", session.error);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Store::new(Session::default(), reducer);
    let host: Host = Rc::new(Metrics::new(Recording::new(Trace::with_prefix(store, "session"))));
    let config = RuntimeConfig::default().with_max_sync_steps(1_000);

    LocalSet::new()
        .run_until(async {
            let middleware = SagaMiddleware::with_config(Rc::clone(&host), TokioSpawner, config);
            let watcher = middleware.start(take_every("LOGIN", LoginHandler::new));

            attempt(&middleware, "nobody").await?;
            attempt(&middleware, "xiaoming").await?;

            println!("\nWatcher status: {:?}", watcher.status());
            println!("Dispatched: {:?}", host.inner().action_types());
            println!("Dispatches: {}, failures: {}", host.dispatch_count(), host.error_count());
            anyhow::Ok(())
        })
        .await
}
