// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of AMQP connections and implements the
//! [`crate::broker`] traits on top of `lapin`: a [`Connection`] opens
//! channels, a [`Channel`] provisions, publishes and consumes, and every
//! delivery is settled through its `Acker`.

use crate::{
    ack::AckDecision,
    broker::{BrokerChannel, Connector, DeliveryStream, Envelope, InboundDelivery},
    config::AmqpConfig,
    errors::{AmqpError, BrokerFault},
    exchange::ExchangeDefinition,
    queue::{DeclaredQueue, QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Creates the process-wide AMQP connection.
///
/// The connection is named after `cfg.connection_name` so it can be told apart
/// in the broker's management UI. Channels are opened from it through the
/// [`Connector`] implementation, one per publisher or consumer loop.
///
/// # Parameters
/// * `cfg` - Connection settings
///
/// # Returns
/// The shared connection, or `ConnectionError` when the broker can't be reached
pub async fn new_amqp_connection(cfg: &AmqpConfig) -> Result<Arc<Connection>, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    match Connection::connect(&cfg.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(Arc::new(conn))
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }
}

#[async_trait]
impl Connector for Connection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(c))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(match BrokerFault::from(err) {
                    BrokerFault::Connection(reason) => AmqpError::ConnectionError(reason),
                    fault => AmqpError::ChannelError(fault.to_string()),
                })
            }
        }
    }
}

#[async_trait]
impl BrokerChannel for Channel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerFault> {
        self.exchange_declare(
            &def.name,
            def.kind.into(),
            ExchangeDeclareOptions {
                passive: false,
                durable: def.durable,
                auto_delete: def.delete,
                internal: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(BrokerFault::from)
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<DeclaredQueue, BrokerFault> {
        let queue = self
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                FieldTable::from(def.arguments()),
            )
            .await?;

        Ok(DeclaredQueue {
            name: queue.name().to_string(),
            durability: def.durability(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerFault> {
        self.queue_bind(
            &binding.queue_name,
            &binding.exchange_name,
            &binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
        .map_err(BrokerFault::from)
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerFault> {
        self.basic_qos(count, BasicQosOptions { global: false })
            .await
            .map_err(BrokerFault::from)
    }

    async fn publish(&self, exchange: &str, envelope: &Envelope) -> Result<(), BrokerFault> {
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(envelope.content_type.clone()))
            .with_headers(FieldTable::from(envelope.headers.clone()));

        if let Some(id) = &envelope.message_id {
            properties = properties.with_message_id(ShortString::from(id.clone()));
        }

        // The returned confirm is intentionally not awaited.
        self.basic_publish(
            exchange,
            &envelope.routing_key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            &envelope.payload,
            properties,
        )
        .await?;

        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerFault> {
        let consumer = self
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;

        Ok(consumer
            .map(|result| {
                result
                    .map(|delivery| Box::new(LapinDelivery::from(delivery)) as Box<dyn InboundDelivery>)
                    .map_err(BrokerFault::from)
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), BrokerFault> {
        Channel::close(self, REPLY_SUCCESS, "closing").await?;
        Ok(())
    }
}

/// A lapin delivery reduced to its envelope and acker.
struct LapinDelivery {
    envelope: Envelope,
    redelivered: bool,
    acker: Acker,
}

impl From<Delivery> for LapinDelivery {
    fn from(delivery: Delivery) -> Self {
        let props = &delivery.properties;

        let envelope = Envelope {
            routing_key: delivery.routing_key.to_string(),
            content_type: match props.content_type() {
                Some(value) => value.to_string(),
                None => String::new(),
            },
            headers: match props.headers() {
                Some(table) => table.inner().clone(),
                None => Default::default(),
            },
            message_id: props.message_id().as_ref().map(|id| id.to_string()),
            payload: delivery.data,
        };

        LapinDelivery {
            envelope,
            redelivered: delivery.redelivered,
            acker: delivery.acker,
        }
    }
}

#[async_trait]
impl InboundDelivery for LapinDelivery {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn settle(&self, decision: AckDecision) -> Result<(), BrokerFault> {
        let result = match decision {
            AckDecision::Accept => self.acker.ack(BasicAckOptions { multiple: false }).await,
            AckDecision::RetryLater => {
                self.acker
                    .nack(BasicNackOptions {
                        multiple: false,
                        requeue: true,
                    })
                    .await
            }
            AckDecision::Drop => {
                self.acker
                    .nack(BasicNackOptions {
                        multiple: false,
                        requeue: false,
                    })
                    .await
            }
        };

        result.map_err(BrokerFault::from)
    }
}
