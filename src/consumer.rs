// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module processes one delivered message: decode it, hand it to the
//! subscription's handler and apply the handler's [`AckDecision`] to the
//! broker, exactly once.
//!
//! A payload that can't be decoded and a handler that panics both end up as
//! `Drop`, so the message is dead-lettered instead of being left
//! unacknowledged on the channel.

use crate::{
    ack::AckDecision,
    broker::InboundDelivery,
    codec::{decode_envelope, WireCodec},
    errors::AmqpError,
    otel,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{any::Any, borrow::Cow, panic::AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Application logic invoked for every decoded message of a subscription.
///
/// Deliveries are at-least-once: a handler may see the same logical message
/// again after answering `RetryLater`, or after a failed acknowledgment.
///
/// Any `Fn(T) -> AckDecision` closure is a handler; implement the trait
/// directly for handlers that need to await.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle(&self, value: T) -> AckDecision;
}

#[async_trait]
impl<T, F> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> AckDecision + Send + Sync + 'static,
{
    async fn handle(&self, value: T) -> AckDecision {
        (self)(value)
    }
}

/// Consumes and settles one delivery.
///
/// This function:
/// 1. Opens a consumer span from the propagated trace context
/// 2. Decodes the payload with `C`; a failure is logged and becomes `Drop`
/// 3. Runs the handler; a panic is caught, logged and becomes `Drop`
/// 4. Applies the decision (ack, nack with requeue, nack without requeue)
///
/// # Parameters
/// * `tracer` - OpenTelemetry tracer for creating spans
/// * `delivery` - The delivered message
/// * `handler` - The subscription's handler
///
/// # Returns
/// The applied decision, or the error of the failed settle call. The
/// message's broker-side state is unknown in the latter case.
pub(crate) async fn consume<C, T, H>(
    tracer: &BoxedTracer,
    delivery: &dyn InboundDelivery,
    handler: &H,
) -> Result<AckDecision, AmqpError>
where
    C: WireCodec,
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T>,
{
    let envelope = delivery.envelope();
    let (_, mut span) = otel::new_span(&envelope.headers, tracer, &envelope.routing_key);

    debug!(
        routing_key = envelope.routing_key,
        content_type = envelope.content_type,
        redelivered = delivery.redelivered(),
        "received message"
    );

    let decision = match decode_envelope::<C, T>(envelope) {
        Err(err) => {
            warn!(
                error = err.to_string(),
                "undecodable message, sending to dead-letter"
            );
            span.record_error(&err);
            AckDecision::Drop
        }
        Ok(value) => match AssertUnwindSafe(handler.handle(value)).catch_unwind().await {
            Ok(decision) => decision,
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(reason, "handler panicked, sending to dead-letter");
                span.set_status(Status::Error {
                    description: Cow::from(format!("handler panicked: {reason}")),
                });
                AckDecision::Drop
            }
        },
    };

    match delivery.settle(decision).await {
        Err(fault) => {
            error!(
                error = fault.to_string(),
                decision = %decision,
                "error whiling settling msg"
            );
            span.record_error(&fault);
            span.set_status(Status::Error {
                description: Cow::from("error to settle msg"),
            });

            Err(match decision {
                AckDecision::Accept => AmqpError::AckMessageError,
                AckDecision::RetryLater => AmqpError::RequeuingMessageError,
                AckDecision::Drop => AmqpError::NackMessageError,
            })
        }
        Ok(()) => {
            debug!(
                decision = %decision,
                requeued = !decision.is_final(),
                "message settled"
            );
            if decision == AckDecision::Accept {
                span.set_status(Status::Ok);
            }
            Ok(decision)
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        (*reason).to_owned()
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.clone()
    } else {
        "unknown".to_owned()
    }
}
