// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares exchanges, queues and the bindings between them.
//!
//! The main components are:
//! - `declare_and_bind`: idempotent provisioning of one subscription queue
//! - `AmqpTopology`: declarative set of exchanges, queues and bindings
//! - `dead_letter_topology`: the exchange and queue receiving dropped messages
//!
//! Every queue provisioned for a subscription dead-letters to
//! [`DEAD_LETTER_EXCHANGE`], so a message a handler drops can still be
//! inspected by binding a queue to that exchange.

use crate::{
    broker::BrokerChannel,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{Binding, DeclaredQueue, QueueBinding, QueueDefinition},
};
use tracing::{debug, error};

/// Well-known exchange every provisioned queue dead-letters to
pub const DEAD_LETTER_EXCHANGE: &str = "peril_dlx";
/// Durable queue bound to [`DEAD_LETTER_EXCHANGE`] holding dropped messages
pub const DEAD_LETTER_QUEUE: &str = "peril_dlq";

/// Declares the queue described by `binding` and binds it to its exchange.
///
/// The queue flags follow the binding's durability class and the queue is
/// configured to dead-letter to [`DEAD_LETTER_EXCHANGE`]. Calling this twice
/// with the same binding succeeds both times and yields the same queue;
/// redeclaring a queue name with different parameters fails with
/// `ConfigConflict`.
///
/// On failure the channel is closed before returning, so a half-configured
/// channel is never handed back to the caller.
///
/// # Parameters
/// * `channel` - The channel the subscription will consume from
/// * `binding` - Exchange, queue, routing key and durability class
///
/// # Returns
/// The declared queue or the provisioning error
pub async fn declare_and_bind(
    channel: &dyn BrokerChannel,
    binding: &Binding,
) -> Result<DeclaredQueue, AmqpError> {
    let def = binding.queue_definition(DEAD_LETTER_EXCHANGE);

    let queue = match declare_queue(channel, &def).await {
        Ok(queue) => queue,
        Err(err) => {
            close_quietly(channel).await;
            return Err(err);
        }
    };

    if let Err(err) = bind_queue(channel, &binding.queue_binding()).await {
        close_quietly(channel).await;
        return Err(err);
    }

    debug!(
        queue = queue.name,
        exchange = binding.exchange,
        routing_key = binding.routing_key,
        durability = %binding.durability,
        "queue declared and bound"
    );

    Ok(queue)
}

/// Declares one exchange.
pub async fn declare_exchange(
    channel: &dyn BrokerChannel,
    def: &ExchangeDefinition,
) -> Result<(), AmqpError> {
    debug!("creating exchange: {}", def.name);

    match channel.declare_exchange(def).await {
        Err(fault) => {
            error!(
                error = fault.to_string(),
                name = def.name,
                "error to declare the exchange"
            );
            Err(fault.into_amqp_error(&def.name, || {
                AmqpError::DeclareExchangeError(def.name.clone())
            }))
        }
        _ => {
            debug!("exchange: {} was created", def.name);
            Ok(())
        }
    }
}

async fn declare_queue(
    channel: &dyn BrokerChannel,
    def: &QueueDefinition,
) -> Result<DeclaredQueue, AmqpError> {
    debug!("creating queue: {}", def.name);

    match channel.declare_queue(def).await {
        Err(fault) => {
            error!(
                error = fault.to_string(),
                name = def.name,
                "error to declare the queue"
            );
            Err(fault.into_amqp_error(&def.name, || AmqpError::DeclareQueueError(def.name.clone())))
        }
        Ok(queue) => {
            debug!("queue: {} was created", def.name);
            Ok(queue)
        }
    }
}

async fn bind_queue(channel: &dyn BrokerChannel, binding: &QueueBinding) -> Result<(), AmqpError> {
    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        binding.queue_name, binding.exchange_name, binding.routing_key
    );

    channel.bind_queue(binding).await.map_err(|fault| {
        error!(error = fault.to_string(), "error to bind queue to exchange");
        fault.into_amqp_error(&binding.queue_name, || {
            AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            )
        })
    })
}

async fn close_quietly(channel: &dyn BrokerChannel) {
    if let Err(fault) = channel.close().await {
        debug!(error = fault.to_string(), "channel already closed");
    }
}

/// Declarative set of exchanges, queues and bindings.
///
/// `install` creates them in order: exchanges, then queues, then bindings.
#[derive(Debug, Clone, Default)]
pub struct AmqpTopology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new() -> AmqpTopology {
        AmqpTopology::default()
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology through `channel`.
    ///
    /// Stops at the first failure; everything is declared idempotently so a
    /// failed install can simply be retried.
    pub async fn install(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            declare_exchange(channel, exch).await?;
        }

        for def in &self.queues {
            declare_queue(channel, def).await?;
        }

        for binding in &self.queues_binding {
            bind_queue(channel, binding).await?;
        }

        debug!("topology installed");

        Ok(())
    }
}

/// The dead-letter exchange (fanout, durable) and its durable inspection queue.
///
/// The inspection queue has no dead-letter exchange of its own.
pub fn dead_letter_topology() -> AmqpTopology {
    AmqpTopology::new()
        .exchange(ExchangeDefinition::new(DEAD_LETTER_EXCHANGE).fanout().durable())
        .queue(QueueDefinition::new(DEAD_LETTER_QUEUE).durable())
        .queue_binding(QueueBinding::new(DEAD_LETTER_QUEUE).exchange(DEAD_LETTER_EXCHANGE))
}
