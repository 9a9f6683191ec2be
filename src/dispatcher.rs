// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! This module runs subscriptions. Every subscription gets a dedicated
//! channel, its own queue (declared and bound through
//! [`declare_and_bind`]) and an independent tokio task consuming deliveries
//! one at a time, in delivery order.
//!
//! A subscription moves through `Provisioning -> Streaming -> Draining ->
//! Closed`. Provisioning failures are returned from `subscribe` and no task
//! is started. The loop ends when the delivery stream ends (channel or
//! connection closed) or when the subscription is cancelled; the message in
//! flight is finished first, then the channel is closed so prefetched but
//! unacknowledged messages go back to the queue.

use crate::{
    broker::{BrokerChannel, Connector, DeliveryStream},
    channel::new_amqp_connection,
    codec::{BincodeCodec, JsonCodec, WireCodec},
    config::AmqpConfig,
    consumer::{consume, MessageHandler},
    errors::{AmqpError, BrokerFault},
    queue::Binding,
    topology::declare_and_bind,
};
use futures_util::StreamExt;
use opentelemetry::global;
use serde::de::DeserializeOwned;
use std::{fmt, sync::Arc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Lifecycle of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Provisioning,
    Streaming,
    Draining,
    Closed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Provisioning => write!(f, "provisioning"),
            SubscriptionState::Streaming => write!(f, "streaming"),
            SubscriptionState::Draining => write!(f, "draining"),
            SubscriptionState::Closed => write!(f, "closed"),
        }
    }
}

/// Starts subscriptions on channels opened from one connection.
///
/// Dropping the dispatcher does not stop running subscriptions; call
/// [`Dispatcher::shutdown`] or cancel the individual handles.
pub struct Dispatcher {
    connector: Arc<dyn Connector>,
    prefetch: Option<u16>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Creates a new dispatcher.
    ///
    /// # Parameters
    /// * `connector` - Opens one channel per subscription, usually the shared
    ///   `lapin::Connection`
    ///
    /// # Returns
    /// A new Dispatcher instance
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Dispatcher {
            connector,
            prefetch: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Connects to the broker described by `cfg` and applies its prefetch limit.
    pub async fn connect(cfg: &AmqpConfig) -> Result<Dispatcher, AmqpError> {
        let connection = new_amqp_connection(cfg).await?;

        let mut dispatcher = Dispatcher::new(connection);
        dispatcher.prefetch = cfg.prefetch();
        Ok(dispatcher)
    }

    /// Limits each subscription channel to `count` unacknowledged deliveries.
    ///
    /// Zero leaves the broker default (unlimited) in place.
    pub fn with_prefetch(mut self, count: u16) -> Self {
        self.prefetch = if count > 0 { Some(count) } else { None };
        self
    }

    /// Provisions the queue described by `binding` and starts consuming it.
    ///
    /// This function:
    /// 1. Opens a dedicated channel and applies the prefetch limit
    /// 2. Declares the queue and binds it to its exchange
    /// 3. Registers a consumer with manual acknowledgment
    /// 4. Spawns the consumer loop, which decodes every delivery with `C`,
    ///    passes it to `handler` and settles it with the returned decision
    ///
    /// # Parameters
    /// * `binding` - Exchange, queue, routing key and durability class
    /// * `handler` - Invoked once per decoded delivery
    ///
    /// # Returns
    /// A handle to the running subscription, or the provisioning error. The
    /// channel is closed before an error is returned.
    pub async fn subscribe<C, T, H>(
        &self,
        binding: Binding,
        handler: H,
    ) -> Result<SubscriptionHandle, AmqpError>
    where
        C: WireCodec,
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T>,
    {
        let (state, state_rx) = watch::channel(SubscriptionState::Provisioning);

        let channel = self.connector.open_channel().await?;

        if let Some(count) = self.prefetch {
            if let Err(fault) = channel.set_prefetch(count).await {
                error!(error = fault.to_string(), "error to configure qos");
                close_channel(channel.as_ref()).await;
                return Err(match fault {
                    BrokerFault::Connection(reason) => AmqpError::ConnectionError(reason),
                    fault => AmqpError::QoSDeclarationError(fault.to_string()),
                });
            }
        }

        let queue = declare_and_bind(channel.as_ref(), &binding).await?;

        let consumer_tag = format!("{}-{}", queue.name, Uuid::new_v4());
        let deliveries = match channel.consume(&queue.name, &consumer_tag).await {
            Ok(deliveries) => deliveries,
            Err(fault) => {
                error!(
                    error = fault.to_string(),
                    queue = queue.name,
                    "error to create the consumer"
                );
                close_channel(channel.as_ref()).await;
                return Err(fault.into_amqp_error(&queue.name, || {
                    AmqpError::BindingConsumerError(queue.name.clone())
                }));
            }
        };

        state.send_replace(SubscriptionState::Streaming);

        let token = self.shutdown.child_token();
        let span = info_span!(
            "subscription",
            queue = queue.name,
            routing_key = binding.routing_key
        );

        tokio::spawn(
            stream_deliveries::<C, T, H>(channel, deliveries, handler, token.clone(), state)
                .instrument(span),
        );

        info!(
            queue = queue.name,
            exchange = binding.exchange,
            routing_key = binding.routing_key,
            "subscription started"
        );

        Ok(SubscriptionHandle {
            queue: queue.name,
            state: state_rx,
            token,
        })
    }

    /// Subscribes with JSON decoding.
    pub async fn subscribe_json<T, H>(
        &self,
        binding: Binding,
        handler: H,
    ) -> Result<SubscriptionHandle, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T>,
    {
        self.subscribe::<JsonCodec, T, H>(binding, handler).await
    }

    /// Subscribes with bincode decoding.
    pub async fn subscribe_bincode<T, H>(
        &self,
        binding: Binding,
        handler: H,
    ) -> Result<SubscriptionHandle, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T>,
    {
        self.subscribe::<BincodeCodec, T, H>(binding, handler).await
    }

    /// Cancels every subscription started by this dispatcher.
    pub fn shutdown(&self) {
        debug!("shutting down subscriptions");
        self.shutdown.cancel();
    }
}

/// Handle to a running subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    queue: String,
    state: watch::Receiver<SubscriptionState>,
    token: CancellationToken,
}

impl SubscriptionHandle {
    /// Name of the queue the subscription consumes.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Stops the subscription once the message in flight is settled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits until the subscription reached `Closed`.
    pub async fn closed(&self) -> Result<(), AmqpError> {
        let mut state = self.state.clone();
        let closed = match state.wait_for(|s| *s == SubscriptionState::Closed).await {
            Ok(_) => Ok(()),
            Err(_) => {
                error!(queue = self.queue, "consumer loop ended without closing");
                Err(AmqpError::InternalError)
            }
        };
        closed
    }
}

async fn stream_deliveries<C, T, H>(
    channel: Arc<dyn BrokerChannel>,
    mut deliveries: DeliveryStream,
    handler: H,
    token: CancellationToken,
    state: watch::Sender<SubscriptionState>,
) where
    C: WireCodec,
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T>,
{
    let tracer = global::tracer("amqp consumer");

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("subscription cancelled");
                break;
            }
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                if let Err(err) = consume::<C, T, H>(&tracer, delivery.as_ref(), &handler).await {
                    error!(error = err.to_string(), "error consume msg");
                }
            }
            Some(Err(fault)) => error!(error = fault.to_string(), "errors consume msg"),
            None => {
                warn!("delivery stream ended");
                break;
            }
        }
    }

    state.send_replace(SubscriptionState::Draining);
    drop(deliveries);
    close_channel(channel.as_ref()).await;
    state.send_replace(SubscriptionState::Closed);

    info!("subscription closed");
}

async fn close_channel(channel: &dyn BrokerChannel) {
    if let Err(fault) = channel.close().await {
        debug!(error = fault.to_string(), "channel already closed");
    }
}
