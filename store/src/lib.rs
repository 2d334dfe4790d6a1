//! Host side of the sagaflow runtime
//!
//! [`Store`] is a minimal reducer-driven state container implementing
//! [`sagaflow::Host`]. The middleware types wrap any host to add cross-cutting
//! concerns (logging, counting, recording, fault injection) without the sagas
//! noticing.

pub mod middleware;
pub mod store;

pub use middleware::{FaultInjection, Metrics, Recording, Trace};
pub use store::{Store, Subscription};
