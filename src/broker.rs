// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Abstraction
//!
//! The provisioner, publisher and consumer loop only talk to the broker
//! through the traits of this module. [`crate::channel`] implements them on
//! top of `lapin`; the tests implement them with an in-memory broker.
//!
//! A [`BrokerChannel`] is not meant to be shared between concurrent
//! publishers or consumer loops: each one opens its own through a
//! [`Connector`].

use crate::{
    ack::AckDecision,
    errors::{AmqpError, BrokerFault},
    exchange::ExchangeDefinition,
    queue::{DeclaredQueue, QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::types::{AMQPValue, ShortString};
#[cfg(test)]
use mockall::automock;
use std::{collections::BTreeMap, sync::Arc};

/// A message as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub routing_key: String,
    /// Identifies the codec that produced `payload`.
    pub content_type: String,
    pub payload: Vec<u8>,
    /// Application headers; carries the trace context.
    pub headers: BTreeMap<ShortString, AMQPValue>,
    pub message_id: Option<String>,
}

/// Stream of deliveries produced by [`BrokerChannel::consume`].
///
/// The stream ends once the channel or its connection is closed.
pub type DeliveryStream = BoxStream<'static, Result<Box<dyn InboundDelivery>, BrokerFault>>;

/// A delivered message awaiting its acknowledgment decision.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn envelope(&self) -> &Envelope;

    /// Whether the broker already delivered this message before.
    fn redelivered(&self) -> bool;

    /// Applies the decision: ack, nack with requeue, or nack without requeue.
    async fn settle(&self, decision: AckDecision) -> Result<(), BrokerFault>;
}

/// The channel level operations needed to provision, publish and consume.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerFault>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<DeclaredQueue, BrokerFault>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerFault>;

    /// Limits the number of unacknowledged deliveries in flight on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerFault>;

    /// Hands the envelope to the broker. Does not wait for a publisher confirm.
    async fn publish(&self, exchange: &str, envelope: &Envelope) -> Result<(), BrokerFault>;

    /// Starts a manual-acknowledgment consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerFault>;

    async fn close(&self) -> Result<(), BrokerFault>;
}

/// Opens dedicated channels on a shared, process-wide connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;
}
