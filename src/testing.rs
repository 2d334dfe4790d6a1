// Minimal host used by the unit tests

use std::cell::RefCell;
use std::rc::Rc;

use futures::executor::LocalPool;

use crate::effect::{Action, AnyAction};
use crate::env::Host;
use crate::error::{Result, SagaError};
use crate::runtime::SagaMiddleware;

/// Records dispatched actions; state is the number of dispatches so far.
#[derive(Default)]
pub(crate) struct LogHost {
    pub dispatched: RefCell<Vec<AnyAction>>,
    pub reject: Option<&'static str>,
}

impl LogHost {
    pub fn kinds(&self) -> Vec<String> {
        self.dispatched
            .borrow()
            .iter()
            .map(|a| a.kind.clone())
            .collect()
    }
}

impl Host for LogHost {
    type State = usize;
    type Action = AnyAction;

    fn get_state(&self) -> usize {
        self.dispatched.borrow().len()
    }

    fn dispatch(&self, action: AnyAction) -> Result<AnyAction> {
        if self.reject == Some(action.action_type()) {
            return Err(SagaError::Dispatch(format!("{} rejected", action.kind)));
        }
        self.dispatched.borrow_mut().push(action.clone());
        Ok(action)
    }
}

pub(crate) type TestMiddleware = SagaMiddleware<Rc<LogHost>>;

pub(crate) fn middleware(host: LogHost) -> (TestMiddleware, Rc<LogHost>, LocalPool) {
    let host = Rc::new(host);
    let pool = LocalPool::new();
    let middleware = SagaMiddleware::new(Rc::clone(&host), pool.spawner());
    (middleware, host, pool)
}
