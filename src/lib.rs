// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod ack;
pub mod broker;
pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

pub use ack::AckDecision;
pub use consumer::MessageHandler;
pub use dispatcher::{Dispatcher, SubscriptionHandle, SubscriptionState};
pub use errors::AmqpError;
pub use publisher::Publisher;
pub use queue::{Binding, Durability};
pub use topology::declare_and_bind;
