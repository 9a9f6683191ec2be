// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Client
//!
//! `AmqpError` is what callers see: setup-time failures returned from
//! provisioning, publishing and subscribing, plus the per-message failures the
//! consumer loop logs. `BrokerFault` is the lower-level classification of a
//! failed broker call, produced by a [`crate::broker::BrokerChannel`] and
//! translated into an `AmqpError` with the context of the operation that failed.

use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// The broker is unreachable or the connection dropped
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// A single channel broke or could not be created
    #[error("failure on channel `{0}`")]
    ChannelError(String),

    /// A queue or binding was declared with parameters incompatible with an existing one
    #[error("queue `{0}` already exists with different parameters")]
    ConfigConflict(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error starting a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error publishing a message
    #[error("failure to publish to `{0}`")]
    PublishingError(String),

    /// A value could not be serialized
    #[error("failure to encode value as `{content_type}`: {reason}")]
    EncodeError {
        content_type: String,
        reason: String,
    },

    /// A payload could not be deserialized
    #[error("failure to decode `{content_type}` payload `{payload}`: {reason}")]
    DecodeError {
        content_type: String,
        payload: String,
        reason: String,
    },

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error requeuing a message
    #[error("failure to requeuing message")]
    RequeuingMessageError,

    /// A durability class outside of the supported ones
    #[error("invalid durability `{0}`")]
    InvalidDurability(String),

    /// Connection settings could not be loaded
    #[error("failure to load configuration `{0}`")]
    ConfigError(String),
}

/// Classification of a failed broker call, independent of which call failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerFault {
    /// The connection is gone; every channel on it is unusable
    #[error("connection failure: {0}")]
    Connection(String),

    /// The channel was closed or rejected the call
    #[error("channel failure: {0}")]
    Channel(String),

    /// The broker refused a redeclaration with different parameters
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The referenced exchange or queue does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<lapin::Error> for BrokerFault {
    fn from(err: lapin::Error) -> Self {
        match &err {
            lapin::Error::ProtocolError(amqp) => match amqp.kind() {
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                    BrokerFault::PreconditionFailed(err.to_string())
                }
                AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => {
                    BrokerFault::NotFound(err.to_string())
                }
                AMQPErrorKind::Hard(_) => BrokerFault::Connection(err.to_string()),
                _ => BrokerFault::Channel(err.to_string()),
            },
            lapin::Error::InvalidConnectionState(_) | lapin::Error::IOError(_) => {
                BrokerFault::Connection(err.to_string())
            }
            _ => BrokerFault::Channel(err.to_string()),
        }
    }
}

impl BrokerFault {
    /// Translates the fault into an [`AmqpError`].
    ///
    /// Connection faults always become `ConnectionError` and refused
    /// redeclarations become `ConfigConflict` for `subject`; everything else
    /// becomes the operation specific error built by `otherwise`.
    pub(crate) fn into_amqp_error<F>(self, subject: &str, otherwise: F) -> AmqpError
    where
        F: FnOnce() -> AmqpError,
    {
        match self {
            BrokerFault::Connection(reason) => AmqpError::ConnectionError(reason),
            BrokerFault::PreconditionFailed(_) => AmqpError::ConfigConflict(subject.to_owned()),
            BrokerFault::Channel(_) | BrokerFault::NotFound(_) => otherwise(),
        }
    }
}
