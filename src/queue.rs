// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management for RabbitMQ
//!
//! This module provides the types used to describe queues and their bindings.
//! Every queue a subscription declares is derived from a [`Binding`]: the
//! [`Durability`] class decides the persistence flags and every queue carries
//! a dead-letter exchange so dropped messages stay inspectable.

use crate::errors::AmqpError;
use lapin::types::{AMQPValue, LongString, ShortString};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Constant for the queue argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Persistence class of a queue.
///
/// - Durable: survives broker restarts, never auto-deleted, shared.
/// - Transient: deleted once unused, exclusive to the declaring connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Durability {
    Durable,
    Transient,
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Durability::Durable => write!(f, "Durable"),
            Durability::Transient => write!(f, "Transient"),
        }
    }
}

impl TryFrom<i32> for Durability {
    type Error = AmqpError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Durability::Durable),
            1 => Ok(Durability::Transient),
            other => Err(AmqpError::InvalidDurability(other.to_string())),
        }
    }
}

impl FromStr for Durability {
    type Err = AmqpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "durable" => Ok(Durability::Durable),
            "transient" => Ok(Durability::Transient),
            _ => Err(AmqpError::InvalidDurability(s.to_owned())),
        }
    }
}

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue
/// definitions. Two definitions with the same name but different flags or
/// arguments conflict on the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) dead_letter_exchange: Option<String>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created non-durable, non-exclusive and
    /// without a dead-letter exchange.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue definition with default settings
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            delete: false,
            exclusive: false,
            dead_letter_exchange: None,
        }
    }

    /// Creates a queue definition whose flags follow the durability class.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    /// * `durability` - Persistence class of the queue
    ///
    /// # Returns
    /// A queue definition ready to be declared
    pub fn with_durability(name: &str, durability: Durability) -> QueueDefinition {
        let def = QueueDefinition::new(name);
        match durability {
            Durability::Durable => def.durable(),
            Durability::Transient => def.delete().exclusive(),
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Routes rejected messages to the given exchange.
    ///
    /// # Parameters
    /// * `exchange` - The dead-letter exchange name
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    /// The queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The durability class implied by the flags.
    pub fn durability(&self) -> Durability {
        if self.durable {
            Durability::Durable
        } else {
            Durability::Transient
        }
    }

    /// Builds the `x-*` arguments sent along with `queue.declare`.
    pub fn arguments(&self) -> BTreeMap<ShortString, AMQPValue> {
        let mut args = BTreeMap::new();

        if let Some(dlx) = &self.dead_letter_exchange {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(dlx.as_str())),
            );
        }

        args
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Queue bindings define how messages flow from exchanges to queues based on
/// routing keys and exchange types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name and routing key are empty strings.
    ///
    /// # Parameters
    /// * `queue` - The name of the queue to bind
    ///
    /// # Returns
    /// A new queue binding with default settings
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}

/// A subscription's view of the topology: which queue to declare, how durable
/// it is, and which exchange/routing key feeds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub durability: Durability,
}

impl Binding {
    pub fn new(exchange: &str, queue: &str, routing_key: &str, durability: Durability) -> Self {
        Binding {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            routing_key: routing_key.to_owned(),
            durability,
        }
    }

    /// The queue definition declared for this binding, dead-lettering to `dlx`.
    pub fn queue_definition(&self, dlx: &str) -> QueueDefinition {
        QueueDefinition::with_durability(&self.queue, self.durability).dead_letter_exchange(dlx)
    }

    pub fn queue_binding(&self) -> QueueBinding {
        QueueBinding::new(&self.queue)
            .exchange(&self.exchange)
            .routing_key(&self.routing_key)
    }
}

/// Queue descriptor returned by the broker after a successful declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    pub name: String,
    pub durability: Durability,
    pub message_count: u32,
    pub consumer_count: u32,
}
