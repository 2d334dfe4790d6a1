// Effect descriptors
//
// Effects are plain data describing what a saga wants done. They are built once by
// the saga, consumed once by the executor, and carry no behaviour of their own.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::{Channel, Matcher};
use crate::env::Host;
use crate::error::SagaError;
use crate::saga::Saga;
use crate::task::TaskHandle;

/// Actions flowing through the host and the channel.
pub trait Action: Clone + fmt::Debug + 'static {
    /// Discriminant matched by [`Pattern`]s.
    fn action_type(&self) -> &str;
}

/// General purpose action: a type tag and a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl AnyAction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }
}

impl Action for AnyAction {
    fn action_type(&self) -> &str {
        &self.kind
    }
}

/// Which actions a `Take` accepts.
pub enum Pattern<A> {
    /// Every action. The string pattern `"*"` converts to this.
    Any,
    /// Actions whose type equals the tag.
    Type(Cow<'static, str>),
    /// Actions whose type equals any of the tags.
    OneOf(Vec<Cow<'static, str>>),
    Predicate(Matcher<A>),
}

impl<A: Action> Pattern<A> {
    pub fn predicate(f: impl Fn(&A) -> bool + 'static) -> Self {
        Pattern::Predicate(Rc::new(f))
    }

    pub fn one_of<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Cow<'static, str>>,
    {
        Pattern::OneOf(tags.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, action: &A) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Type(tag) => action.action_type() == tag.as_ref(),
            Pattern::OneOf(tags) => tags.iter().any(|tag| action.action_type() == tag.as_ref()),
            Pattern::Predicate(f) => f(action),
        }
    }

    /// Channel matcher equivalent to this pattern.
    pub fn into_matcher(self) -> Matcher<A> {
        match self {
            Pattern::Predicate(f) => f,
            pattern => Rc::new(move |action: &A| pattern.matches(action)),
        }
    }
}

impl<A> Clone for Pattern<A> {
    fn clone(&self) -> Self {
        match self {
            Pattern::Any => Pattern::Any,
            Pattern::Type(tag) => Pattern::Type(tag.clone()),
            Pattern::OneOf(tags) => Pattern::OneOf(tags.clone()),
            Pattern::Predicate(f) => Pattern::Predicate(Rc::clone(f)),
        }
    }
}

impl<A> fmt::Debug for Pattern<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("*"),
            Pattern::Type(tag) => write!(f, "{tag:?}"),
            Pattern::OneOf(tags) => f.debug_list().entries(tags).finish(),
            Pattern::Predicate(_) => f.write_str("<predicate>"),
        }
    }
}

impl<A> From<&'static str> for Pattern<A> {
    fn from(tag: &'static str) -> Self {
        if tag == "*" {
            Pattern::Any
        } else {
            Pattern::Type(Cow::Borrowed(tag))
        }
    }
}

impl<A> From<String> for Pattern<A> {
    fn from(tag: String) -> Self {
        if tag == "*" {
            Pattern::Any
        } else {
            Pattern::Type(Cow::Owned(tag))
        }
    }
}

/// What a called function hands back to the `Call` executor.
pub enum Completion {
    /// Settled synchronously; the saga resumes immediately.
    Ready(Result<Value, SagaError>),
    /// Settles later; the saga stays suspended until then.
    Deferred(LocalBoxFuture<'static, Result<Value, SagaError>>),
}

impl Completion {
    pub fn ok(value: impl Into<Value>) -> Self {
        Completion::Ready(Ok(value.into()))
    }

    pub fn err(error: SagaError) -> Self {
        Completion::Ready(Err(error))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, SagaError>> + 'static,
    {
        Completion::Deferred(future.boxed_local())
    }
}

impl From<Result<Value, SagaError>> for Completion {
    fn from(result: Result<Value, SagaError>) -> Self {
        Completion::Ready(result)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Completion::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// A function bound to its arguments, waiting to be invoked by `Call`.
pub struct Invocation(Box<dyn FnOnce() -> Completion>);

impl Invocation {
    pub fn new<F, Args, R>(f: F, args: Args) -> Self
    where
        F: FnOnce(Args) -> R + 'static,
        Args: 'static,
        R: Into<Completion>,
    {
        Invocation(Box::new(move || f(args).into()))
    }

    pub(crate) fn invoke(self) -> Completion {
        (self.0)()
    }
}

/// A saga factory bound to its arguments, waiting to be started by `Fork`.
pub struct Spawn<H: Host>(Box<dyn FnOnce() -> Box<dyn Saga<H>>>);

impl<H: Host> Spawn<H> {
    pub fn new<F, Args, S>(f: F, args: Args) -> Self
    where
        F: FnOnce(Args) -> S + 'static,
        Args: 'static,
        S: Saga<H> + 'static,
    {
        Spawn(Box::new(move || Box::new(f(args)) as Box<dyn Saga<H>>))
    }

    pub(crate) fn build(self) -> Box<dyn Saga<H>> {
        (self.0)()
    }
}

/// Projection of the host state requested by `Select`.
pub type Selector<S> = Box<dyn FnOnce(&S) -> Value>;

/// A scheduling intent yielded by a saga.
pub enum Effect<H: Host> {
    /// Suspend until an action matching `pattern` is published on `channel`
    /// (the environment's channel when `None`).
    Take {
        channel: Option<Rc<Channel<H::Action>>>,
        pattern: Pattern<H::Action>,
    },
    /// Dispatch an action into the host. Never suspends.
    Put(H::Action),
    /// Invoke a function; suspends only if it returns a deferred completion.
    Call(Invocation),
    /// Start a concurrent child task and resume immediately with its handle.
    Fork(Spawn<H>),
    /// Read the host state through a projection. Never suspends.
    Select(Selector<H::State>),
    /// Suspend until a forked task settles, taking on its outcome.
    Join(TaskHandle),
}

impl<H: Host> Effect<H> {
    pub fn take(pattern: impl Into<Pattern<H::Action>>) -> Self {
        Effect::Take {
            channel: None,
            pattern: pattern.into(),
        }
    }

    pub fn take_from(
        channel: Rc<Channel<H::Action>>,
        pattern: impl Into<Pattern<H::Action>>,
    ) -> Self {
        Effect::Take {
            channel: Some(channel),
            pattern: pattern.into(),
        }
    }

    pub fn put(action: H::Action) -> Self {
        Effect::Put(action)
    }

    pub fn call<F, Args, R>(f: F, args: Args) -> Self
    where
        F: FnOnce(Args) -> R + 'static,
        Args: 'static,
        R: Into<Completion>,
    {
        Effect::Call(Invocation::new(f, args))
    }

    pub fn fork<F, Args, S>(f: F, args: Args) -> Self
    where
        F: FnOnce(Args) -> S + 'static,
        Args: 'static,
        S: Saga<H> + 'static,
    {
        Effect::Fork(Spawn::new(f, args))
    }

    pub fn select(selector: impl FnOnce(&H::State) -> Value + 'static) -> Self {
        Effect::Select(Box::new(selector))
    }

    pub fn join(task: TaskHandle) -> Self {
        Effect::Join(task)
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::Take { .. } => EffectKind::Take,
            Effect::Put(_) => EffectKind::Put,
            Effect::Call(_) => EffectKind::Call,
            Effect::Fork(_) => EffectKind::Fork,
            Effect::Select(_) => EffectKind::Select,
            Effect::Join(_) => EffectKind::Join,
        }
    }
}

impl<H: Host> fmt::Debug for Effect<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Take { pattern, channel } => f
                .debug_struct("Take")
                .field("pattern", pattern)
                .field("own_channel", &channel.is_some())
                .finish(),
            Effect::Put(action) => f.debug_tuple("Put").field(action).finish(),
            Effect::Join(task) => f.debug_tuple("Join").field(&task.id()).finish(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Discriminant of an [`Effect`], used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Take,
    Put,
    Call,
    Fork,
    Select,
    Join,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectKind::Take => "TAKE",
            EffectKind::Put => "PUT",
            EffectKind::Call => "CALL",
            EffectKind::Fork => "FORK",
            EffectKind::Select => "SELECT",
            EffectKind::Join => "JOIN",
        };
        f.write_str(name)
    }
}

/// Value a saga is resumed with after an effect settles successfully.
#[derive(Debug, Clone)]
pub enum Reply<A> {
    /// Start of the saga, `Step::Pass`, and other effects without a result.
    Empty,
    /// The action matched by a `Take`, or the action returned by the host for a `Put`.
    Action(A),
    /// Result of a `Call`, `Select` or `Join`.
    Value(Value),
    /// Handle of the task started by a `Fork`.
    Task(TaskHandle),
}

impl<A> Reply<A> {
    pub fn into_action(self) -> Option<A> {
        match self {
            Reply::Action(action) => Some(action),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Reply::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_task(self) -> Option<TaskHandle> {
        match self {
            Reply::Task(task) => Some(task),
            _ => None,
        }
    }
}

/// Resumption input: `Err` re-injects a failure at the saga's suspension point.
pub type Resume<A> = Result<Reply<A>, SagaError>;
