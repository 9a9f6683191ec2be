// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module publishes typed values to RabbitMQ exchanges. Values are
//! encoded with a [`WireCodec`], stamped with the codec's content type and a
//! fresh message id, and carry the current OpenTelemetry context in their
//! headers.
//!
//! Publishing is fire-and-forget: the broker's confirm is not awaited and
//! nothing is retried. A failure is only reported when the value can't be
//! encoded or the local submit on the channel fails.

use crate::{
    broker::{BrokerChannel, Envelope},
    codec::{BincodeCodec, JsonCodec, WireCodec},
    errors::{AmqpError, BrokerFault},
    otel,
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Publishes typed values on its own channel.
///
/// The channel should not be shared with a consumer loop or another
/// concurrently used publisher.
pub struct Publisher {
    channel: Arc<dyn BrokerChannel>,
}

impl Publisher {
    /// Creates a new publisher.
    ///
    /// # Parameters
    /// * `channel` - A channel dedicated to this publisher
    ///
    /// # Returns
    /// An Arc-wrapped Publisher instance for sharing between tasks
    pub fn new(channel: Arc<dyn BrokerChannel>) -> Arc<Publisher> {
        Arc::new(Publisher { channel })
    }

    /// Encodes `value` with `C` and submits it to `exchange` under `routing_key`.
    ///
    /// # Parameters
    /// * `exchange` - The exchange to publish to
    /// * `routing_key` - The routing key the exchange routes on
    /// * `value` - The value to publish
    ///
    /// # Returns
    /// Ok(()) once the message was handed to the channel, `EncodeError` when
    /// the value can't be serialized, `ChannelError`/`ConnectionError` when
    /// the submit fails
    pub async fn publish<C, T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        C: WireCodec,
        T: Serialize + Sync,
    {
        let payload = C::encode(value).map_err(|err| {
            error!(error = err.to_string(), "error encoding message");
            err
        })?;

        let mut headers = BTreeMap::default();
        otel::inject_current_context(&mut headers);

        let envelope = Envelope {
            routing_key: routing_key.to_owned(),
            content_type: C::CONTENT_TYPE.to_owned(),
            payload,
            headers,
            message_id: Some(Uuid::new_v4().to_string()),
        };

        match self.channel.publish(exchange, &envelope).await {
            Err(fault) => {
                error!(
                    error = fault.to_string(),
                    exchange, routing_key, "error publishing message"
                );
                Err(match fault {
                    BrokerFault::Connection(reason) => AmqpError::ConnectionError(reason),
                    BrokerFault::NotFound(_) => AmqpError::PublishingError(exchange.to_owned()),
                    fault => AmqpError::ChannelError(fault.to_string()),
                })
            }
            _ => {
                debug!(exchange, routing_key, "message published");
                Ok(())
            }
        }
    }

    /// Publishes `value` as JSON.
    pub async fn publish_json<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + Sync,
    {
        self.publish::<JsonCodec, T>(exchange, routing_key, value).await
    }

    /// Publishes `value` as a bincode record.
    pub async fn publish_bincode<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + Sync,
    {
        self.publish::<BincodeCodec, T>(exchange, routing_key, value).await
    }
}
