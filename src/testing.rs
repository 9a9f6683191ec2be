// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker implementing the [`crate::broker`] traits for tests.
//!
//! It follows the client visible parts of AMQP 0-9-1: direct/topic/fanout
//! routing, idempotent declarations refused with a precondition failure when
//! parameters differ (closing the offending channel), manual acknowledgment,
//! requeue to the head of the queue and dead-lettering of rejected messages.

use crate::{
    ack::AckDecision,
    broker::{BrokerChannel, Connector, DeliveryStream, Envelope, InboundDelivery},
    errors::{AmqpError, BrokerFault},
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{DeclaredQueue, QueueBinding, QueueDefinition},
    routing::{EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC},
    topology::{DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Whether a message published with `routing_key` reaches a queue bound with
/// `binding_key` on an exchange of `kind`.
///
/// Topic keys are dot separated words; `*` matches exactly one word and `#`
/// matches zero or more words.
fn routes(kind: ExchangeKind, binding_key: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => binding_key == routing_key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => {
            let pattern: Vec<&str> = binding_key.split('.').collect();
            let words: Vec<&str> = routing_key.split('.').collect();
            topic_matches(&pattern, &words)
        }
    }
}

fn topic_matches(pattern: &[&str], words: &[&str]) -> bool {
    match (pattern.first(), words.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            topic_matches(&pattern[1..], words)
                || (!words.is_empty() && topic_matches(pattern, &words[1..]))
        }
        (Some(&"*"), Some(_)) => topic_matches(&pattern[1..], &words[1..]),
        (Some(p), Some(w)) if p == w => topic_matches(&pattern[1..], &words[1..]),
        _ => false,
    }
}

struct MemoryQueue {
    definition: QueueDefinition,
    messages: VecDeque<(Envelope, bool)>,
    notify: Arc<Notify>,
    delivered: usize,
    settlements: Vec<AckDecision>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, MemoryQueue>,
    bindings: Vec<QueueBinding>,
}

#[derive(Clone, Default)]
pub(crate) struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    failing_settles: Arc<AtomicUsize>,
}

impl MemoryBroker {
    pub(crate) fn new() -> Self {
        MemoryBroker::default()
    }

    /// A broker with the game exchanges and the dead-letter exchange/queue.
    pub(crate) fn with_peril_exchanges() -> Self {
        let broker = MemoryBroker::new();
        {
            let mut state = broker.lock();
            state
                .exchanges
                .insert(EXCHANGE_PERIL_DIRECT.to_owned(), ExchangeKind::Direct);
            state
                .exchanges
                .insert(EXCHANGE_PERIL_TOPIC.to_owned(), ExchangeKind::Topic);
            state
                .exchanges
                .insert(DEAD_LETTER_EXCHANGE.to_owned(), ExchangeKind::Fanout);
            state.queues.insert(
                DEAD_LETTER_QUEUE.to_owned(),
                MemoryQueue::new(QueueDefinition::new(DEAD_LETTER_QUEUE).durable()),
            );
            state
                .bindings
                .push(QueueBinding::new(DEAD_LETTER_QUEUE).exchange(DEAD_LETTER_EXCHANGE));
        }
        broker
    }

    pub(crate) fn channel(&self) -> MemoryChannel {
        MemoryChannel {
            broker: self.clone(),
            closed: CancellationToken::new(),
        }
    }

    /// Messages waiting in `queue`, not yet delivered.
    pub(crate) fn message_count(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.messages.len())
    }

    pub(crate) fn ready_messages(&self, queue: &str) -> Vec<Envelope> {
        self.lock().queues.get(queue).map_or_else(Vec::new, |q| {
            q.messages.iter().map(|(envelope, _)| envelope.clone()).collect()
        })
    }

    /// Number of deliveries made from `queue`, redeliveries included.
    pub(crate) fn delivered(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.delivered)
    }

    /// Decisions applied to messages of `queue`, in order.
    pub(crate) fn settlements(&self, queue: &str) -> Vec<AckDecision> {
        self.lock()
            .queues
            .get(queue)
            .map_or_else(Vec::new, |q| q.settlements.clone())
    }

    pub(crate) fn binding_count(&self, queue: &str) -> usize {
        self.lock()
            .bindings
            .iter()
            .filter(|b| b.queue_name == queue)
            .count()
    }

    /// Makes the next `count` settle calls fail.
    pub(crate) fn fail_next_settles(&self, count: usize) {
        self.failing_settles.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route(&self, exchange: &str, envelope: &Envelope) -> Result<(), BrokerFault> {
        let mut state = self.lock();

        let kind = *state
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerFault::NotFound(format!("no exchange '{exchange}'")))?;

        let mut targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| {
                b.exchange_name == exchange && routes(kind, &b.routing_key, &envelope.routing_key)
            })
            .map(|b| b.queue_name.clone())
            .collect();
        targets.sort();
        targets.dedup();

        for name in targets {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.messages.push_back((envelope.clone(), false));
                queue.notify.notify_one();
            }
        }

        Ok(())
    }

    fn next_message(&self, queue: &str) -> Option<(Envelope, bool)> {
        let mut state = self.lock();
        let queue = state.queues.get_mut(queue)?;
        let next = queue.messages.pop_front()?;
        queue.delivered += 1;
        Some(next)
    }

    fn settle(
        &self,
        queue: &str,
        envelope: &Envelope,
        decision: AckDecision,
    ) -> Result<(), BrokerFault> {
        let failing = self.failing_settles.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_settles.store(failing - 1, Ordering::SeqCst);
            return Err(BrokerFault::Channel("channel closed while settling".into()));
        }

        let dead_letter = {
            let mut state = self.lock();
            let Some(q) = state.queues.get_mut(queue) else {
                return Err(BrokerFault::NotFound(format!("no queue '{queue}'")));
            };
            q.settlements.push(decision);

            match decision {
                AckDecision::Accept => None,
                AckDecision::RetryLater => {
                    q.messages.push_front((envelope.clone(), true));
                    q.notify.notify_one();
                    None
                }
                AckDecision::Drop => q.definition.dead_letter_exchange.clone(),
            }
        };

        if let Some(dlx) = dead_letter {
            // Unroutable dead letters are discarded, like the broker does.
            let _ = self.route(&dlx, envelope);
        }

        Ok(())
    }
}

impl MemoryQueue {
    fn new(definition: QueueDefinition) -> Self {
        MemoryQueue {
            definition,
            messages: VecDeque::new(),
            notify: Arc::new(Notify::new()),
            delivered: 0,
            settlements: Vec::new(),
        }
    }

    fn descriptor(&self) -> DeclaredQueue {
        DeclaredQueue {
            name: self.definition.name.clone(),
            durability: self.definition.durability(),
            message_count: self.messages.len() as u32,
            consumer_count: 0,
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        Ok(Arc::new(self.channel()))
    }
}

pub(crate) struct MemoryChannel {
    broker: MemoryBroker,
    closed: CancellationToken,
}

impl MemoryChannel {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn ensure_open(&self) -> Result<(), BrokerFault> {
        if self.is_closed() {
            return Err(BrokerFault::Channel("channel closed".into()));
        }
        Ok(())
    }

    /// A refused declaration closes the channel, as the broker does.
    fn refuse(&self, fault: BrokerFault) -> BrokerFault {
        self.closed.cancel();
        fault
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerFault> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        match state.exchanges.get(&def.name) {
            Some(kind) if *kind != def.kind => Err(self.refuse(BrokerFault::PreconditionFailed(
                format!("inequivalent arg 'type' for exchange '{}'", def.name),
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(def.name.clone(), def.kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<DeclaredQueue, BrokerFault> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        if let Some(existing) = state.queues.get(&def.name) {
            if existing.definition != *def {
                return Err(self.refuse(BrokerFault::PreconditionFailed(format!(
                    "inequivalent arg for queue '{}'",
                    def.name
                ))));
            }
            return Ok(existing.descriptor());
        }

        let queue = MemoryQueue::new(def.clone());
        let descriptor = queue.descriptor();
        state.queues.insert(def.name.clone(), queue);
        Ok(descriptor)
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerFault> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        if !state.exchanges.contains_key(&binding.exchange_name) {
            return Err(self.refuse(BrokerFault::NotFound(format!(
                "no exchange '{}'",
                binding.exchange_name
            ))));
        }
        if !state.queues.contains_key(&binding.queue_name) {
            return Err(self.refuse(BrokerFault::NotFound(format!(
                "no queue '{}'",
                binding.queue_name
            ))));
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }

        Ok(())
    }

    async fn set_prefetch(&self, _count: u16) -> Result<(), BrokerFault> {
        self.ensure_open()
    }

    async fn publish(&self, exchange: &str, envelope: &Envelope) -> Result<(), BrokerFault> {
        self.ensure_open()?;
        self.broker.route(exchange, envelope)
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, BrokerFault> {
        self.ensure_open()?;

        let notify = match self.broker.lock().queues.get(queue) {
            Some(q) => q.notify.clone(),
            None => {
                return Err(self.refuse(BrokerFault::NotFound(format!("no queue '{queue}'"))));
            }
        };

        let seed = (self.broker.clone(), queue.to_owned(), notify, self.closed.clone());

        let deliveries = stream::unfold(seed, |(broker, queue, notify, closed)| async move {
            loop {
                if closed.is_cancelled() {
                    return None;
                }

                if let Some((envelope, redelivered)) = broker.next_message(&queue) {
                    let delivery: Box<dyn InboundDelivery> = Box::new(MemoryDelivery {
                        broker: broker.clone(),
                        queue: queue.clone(),
                        envelope,
                        redelivered,
                        settled: AtomicBool::new(false),
                    });
                    return Some((Ok(delivery), (broker, queue, notify, closed)));
                }

                tokio::select! {
                    _ = closed.cancelled() => return None,
                    _ = notify.notified() => {}
                }
            }
        });

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> Result<(), BrokerFault> {
        self.ensure_open()?;
        self.closed.cancel();
        Ok(())
    }
}

struct MemoryDelivery {
    broker: MemoryBroker,
    queue: String,
    envelope: Envelope,
    redelivered: bool,
    settled: AtomicBool,
}

#[async_trait]
impl InboundDelivery for MemoryDelivery {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn settle(&self, decision: AckDecision) -> Result<(), BrokerFault> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BrokerFault::PreconditionFailed("unknown delivery tag".into()));
        }
        self.broker.settle(&self.queue, &self.envelope, decision)
    }
}

/// A standalone delivery recording the decisions applied to it.
pub(crate) struct RecordingDelivery {
    envelope: Envelope,
    decisions: Mutex<Vec<AckDecision>>,
    failing: bool,
}

impl RecordingDelivery {
    pub(crate) fn new(envelope: Envelope) -> Self {
        RecordingDelivery {
            envelope,
            decisions: Mutex::new(Vec::new()),
            failing: false,
        }
    }

    /// Every settle call fails.
    pub(crate) fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub(crate) fn settlements(&self) -> Vec<AckDecision> {
        self.decisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl InboundDelivery for RecordingDelivery {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn redelivered(&self) -> bool {
        false
    }

    async fn settle(&self, decision: AckDecision) -> Result<(), BrokerFault> {
        if self.failing {
            return Err(BrokerFault::Channel("channel closed".into()));
        }
        self.decisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(decision);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_routes_on_exact_key() {
        assert!(routes(ExchangeKind::Direct, "pause", "pause"));
        assert!(!routes(ExchangeKind::Direct, "pause", "pause.alice"));
    }

    #[test]
    fn topic_star_matches_one_word() {
        assert!(routes(ExchangeKind::Topic, "army_moves.*", "army_moves.bob"));
        assert!(!routes(ExchangeKind::Topic, "army_moves.*", "army_moves"));
        assert!(!routes(ExchangeKind::Topic, "army_moves.*", "army_moves.bob.extra"));
    }

    #[test]
    fn topic_hash_matches_any_suffix() {
        assert!(routes(ExchangeKind::Topic, "game_logs.#", "game_logs"));
        assert!(routes(ExchangeKind::Topic, "game_logs.#", "game_logs.alice"));
        assert!(routes(ExchangeKind::Topic, "#", "war.alice"));
        assert!(!routes(ExchangeKind::Topic, "war.#", "game_logs.alice"));
    }

    #[test]
    fn fanout_ignores_key() {
        assert!(routes(ExchangeKind::Fanout, "", "army_moves.bob"));
    }
}
