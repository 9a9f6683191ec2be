// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Peril Routing
//!
//! Exchange names, routing keys and the message shapes the game exchanges
//! over them. Field names are PascalCase on the wire (`{"IsPaused":true}`).

pub use crate::topology::{DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE};

use crate::{
    exchange::ExchangeDefinition,
    topology::{dead_letter_topology, AmqpTopology},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Routing key prefix for army movement messages
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
/// Routing key prefix for war declaration messages
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
/// Routing key for pause/resume messages
pub const PAUSE_KEY: &str = "pause";
/// Routing key prefix for game log messages
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Direct exchange for targeted delivery
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Topic exchange for pattern based delivery
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";

/// `<prefix>.<username>`, the key or queue name scoped to one player.
pub fn scoped(prefix: &str, username: &str) -> String {
    format!("{prefix}.{username}")
}

/// `<prefix>.*`, matching the keys of every player on the topic exchange.
pub fn any_player(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// Exchanges used by the game plus the dead-letter topology.
pub fn peril_topology() -> AmqpTopology {
    dead_letter_topology()
        .exchange(ExchangeDefinition::new(EXCHANGE_PERIL_DIRECT).direct().durable())
        .exchange(ExchangeDefinition::new(EXCHANGE_PERIL_TOPIC).topic().durable())
}

/// Pause/resume state broadcast by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Unit {
    #[serde(rename = "ID")]
    pub id: i32,
    pub rank: UnitRank,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Player {
    pub username: String,
    pub units: HashMap<i32, Unit>,
}

/// Movement order of some of a player's units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArmyMove {
    pub player: Player,
    pub units: Vec<Unit>,
    pub to_location: String,
}

/// Declaration of war between two players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}

/// Game event log entry; published with the binary codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}
