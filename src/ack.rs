// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Acknowledgment Decisions
//!
//! A handler answers every message it processes with exactly one
//! [`AckDecision`]; the consumer loop turns it into the matching broker call.

use std::fmt;

/// Outcome of handling one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Finalize the message, removing it from the queue (`basic.ack`).
    Accept,
    /// Return the message to the queue for redelivery (`basic.nack`, requeue).
    RetryLater,
    /// Finalize without redelivery (`basic.nack`, no requeue). The broker
    /// routes it to the queue's dead-letter exchange.
    Drop,
}

impl AckDecision {
    /// Whether the broker removes the message from the original queue.
    pub fn is_final(&self) -> bool {
        !matches!(self, AckDecision::RetryLater)
    }
}

impl fmt::Display for AckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckDecision::Accept => write!(f, "Accept"),
            AckDecision::RetryLater => write!(f, "RetryLater"),
            AckDecision::Drop => write!(f, "Drop"),
        }
    }
}
