// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Wire Codecs
//!
//! A codec turns a typed value into a payload and back. The content type it
//! stamps on published messages lets the consumer refuse payloads produced by
//! another codec instead of guessing.
//!
//! - [`JsonCodec`]: self-describing text, tolerant to added fields.
//! - [`BincodeCodec`]: compact binary records for fixed shapes, e.g. records
//!   holding timestamps.

use crate::{broker::Envelope, errors::AmqpError};
use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

/// Content type stamped on JSON payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type stamped on bincode payloads
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

const MAX_BINCODE_PAYLOAD: u64 = 16 * 1024 * 1024;
const PAYLOAD_PREVIEW_LEN: usize = 128;

/// Encodes and decodes typed values to and from message payloads.
pub trait WireCodec: Send + Sync + 'static {
    const CONTENT_TYPE: &'static str;

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, AmqpError>;

    fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, AmqpError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    const CONTENT_TYPE: &'static str = JSON_CONTENT_TYPE;

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(value).map_err(|err| encode_error(Self::CONTENT_TYPE, err))
    }

    fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, AmqpError> {
        serde_json::from_slice(payload)
            .map_err(|err| decode_error(Self::CONTENT_TYPE, payload, err))
    }
}

/// Binary codec backed by `bincode`.
///
/// Uses fixed-width integers, caps payloads at 16 MiB and rejects trailing
/// bytes so a buffer of another type rarely decodes by accident.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    fn options() -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(MAX_BINCODE_PAYLOAD)
            .reject_trailing_bytes()
    }
}

impl WireCodec for BincodeCodec {
    const CONTENT_TYPE: &'static str = BINCODE_CONTENT_TYPE;

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, AmqpError> {
        Self::options()
            .serialize(value)
            .map_err(|err| encode_error(Self::CONTENT_TYPE, err))
    }

    fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, AmqpError> {
        Self::options()
            .deserialize(payload)
            .map_err(|err| decode_error(Self::CONTENT_TYPE, payload, err))
    }
}

/// Decodes an envelope with `C`, refusing any other content type.
pub fn decode_envelope<C, T>(envelope: &Envelope) -> Result<T, AmqpError>
where
    C: WireCodec,
    T: DeserializeOwned,
{
    if envelope.content_type != C::CONTENT_TYPE {
        return Err(AmqpError::DecodeError {
            content_type: envelope.content_type.clone(),
            payload: preview(&envelope.payload),
            reason: format!("expected content type `{}`", C::CONTENT_TYPE),
        });
    }

    C::decode(&envelope.payload)
}

fn encode_error(content_type: &str, err: impl ToString) -> AmqpError {
    AmqpError::EncodeError {
        content_type: content_type.to_owned(),
        reason: err.to_string(),
    }
}

fn decode_error(content_type: &str, payload: &[u8], err: impl ToString) -> AmqpError {
    AmqpError::DecodeError {
        content_type: content_type.to_owned(),
        payload: preview(payload),
        reason: err.to_string(),
    }
}

fn preview(payload: &[u8]) -> String {
    let end = payload.len().min(PAYLOAD_PREVIEW_LEN);
    let mut text = String::from_utf8_lossy(&payload[..end]).into_owned();
    if payload.len() > PAYLOAD_PREVIEW_LEN {
        text.push_str("...");
    }
    text
}
