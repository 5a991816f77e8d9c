//! Core aggregate and domain event traits.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use common::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts the aggregate noticed while handling a
/// command. They are immutable and named in past tense or as a condition.
pub trait DomainEvent: Serialize + DeserializeOwned + Debug + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is the key handlers are registered under.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregate roots.
///
/// An aggregate is the consistency boundary within which invariants are
/// enforced atomically. The persistence layer only ever loads and stores whole
/// aggregates, addressed by their natural key.
pub trait Aggregate: Send + Sync {
    /// Natural key of the aggregate.
    type Id: Clone + Eq + Hash + Display + Send + Sync;

    /// The type of events this aggregate raises.
    type Event: DomainEvent;

    /// Returns the aggregate type name, used in logs and errors.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's natural key.
    fn id(&self) -> &Self::Id;

    /// Returns the optimistic-concurrency token.
    fn version(&self) -> Version;

    /// Drains the events raised since the last call.
    fn take_events(&mut self) -> Vec<Self::Event>;
}
