//! Messaging
//!
//! - [`MessageBus`] - at-least-once, queue-group transport with explicit ack
//! - [`messages`] - the three lifecycle payloads
//! - [`listeners`] - index-side consumers of validation outcomes
//! - [`validation_worker`] - validator-side consumer of `node:created`

mod bus;
pub mod listeners;
pub mod messages;
pub mod validation_worker;

pub use bus::{
    decode_message, publish_message, BusError, Delivery, InMemoryBus, MessageBus, Subscription,
};
pub use listeners::{spawn_listener, start_index_listeners, MessageHandler, INDEX_QUEUE_GROUP};
pub use messages::{BusMessage, NodeCreated, NodeValidated, NodeValidationFailed};
pub use validation_worker::{start_validation_worker, ValidationWorker, VALIDATION_QUEUE_GROUP};
