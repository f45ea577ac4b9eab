//! Message protocol between the coordinator and its workers.
//!
//! Calls and results travel as opaque frames: an 8-byte little-endian call id
//! followed by a CBOR body. The coordinator only ever needs the header to
//! correlate a result with the call that produced it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{CallId, Payload, SharedRegion};
use crate::error::{CallError, MessageError, ProcedureError};
use crate::scheduler::WorkerConfig;

pub(crate) const HEADER_LEN: usize = 8;

pub(crate) type Frame = Vec<u8>;

/// Messages sent from the coordinator to a worker.
pub(crate) enum ToWorker {
    /// Hands the worker its view of the shared region. Always sent first.
    Init(SharedRegion),
    /// A framed call, see [`encode_call`].
    Call(Frame),
    /// Replaces the worker configuration. Carries no call id.
    Config(Frame),
}

/// Messages sent from a worker back to the coordinator.
pub(crate) enum FromWorker {
    Result { slot: usize, frame: Frame },
    Terminated { slot: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CallBody {
    pub procedure: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Outcome {
    Ok(Payload),
    Err(RemoteError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum RemoteError {
    Procedure(ProcedureError),
    Message(MessageError),
}

fn encode<T: Serialize>(call_id: CallId, body: &T) -> Result<Frame, MessageError> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&call_id.get().to_le_bytes());
    ciborium::into_writer(body, &mut frame).map_err(|e| MessageError::Encode {
        call_id,
        reason: e.to_string(),
    })?;

    Ok(frame)
}

fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<(CallId, T), MessageError> {
    let call_id = peek_call_id(frame)?;
    let body = ciborium::from_reader(&frame[HEADER_LEN..]).map_err(|e| MessageError::Decode {
        call_id,
        reason: e.to_string(),
    })?;

    Ok((call_id, body))
}

/// Reads the call id from the frame header without touching the body.
pub(crate) fn peek_call_id(frame: &[u8]) -> Result<CallId, MessageError> {
    let header: [u8; HEADER_LEN] = frame
        .get(..HEADER_LEN)
        .and_then(|header| header.try_into().ok())
        .ok_or(MessageError::Truncated { len: frame.len() })?;

    Ok(CallId::new(u64::from_le_bytes(header)))
}

pub(crate) fn encode_call(call_id: CallId, body: &CallBody) -> Result<Frame, MessageError> {
    encode(call_id, body)
}

pub(crate) fn decode_call(frame: &[u8]) -> Result<(CallId, CallBody), MessageError> {
    decode(frame)
}

/// Frames the outcome of a call. Never fails: if the outcome itself can't be
/// encoded, the encoding error is sent in its place, and if even that fails
/// the bare header goes out so the coordinator still learns the call ended.
pub(crate) fn encode_result(call_id: CallId, outcome: &Outcome) -> Frame {
    match encode(call_id, outcome) {
        Ok(frame) => frame,
        Err(error) => encode(call_id, &Outcome::Err(RemoteError::Message(error)))
            .unwrap_or_else(|_| call_id.get().to_le_bytes().to_vec()),
    }
}

/// Interprets a result frame for the call the worker was known to be running.
pub(crate) fn decode_result(expected: CallId, frame: &[u8]) -> Result<Payload, CallError> {
    let found = peek_call_id(frame)?;
    if found != expected {
        return Err(MessageError::UnexpectedCallId { expected, found }.into());
    }

    match decode::<Outcome>(frame)?.1 {
        Outcome::Ok(payload) => Ok(payload),
        Outcome::Err(RemoteError::Procedure(error)) => Err(error.into()),
        Outcome::Err(RemoteError::Message(error)) => Err(error.into()),
    }
}

pub(crate) fn encode_config(config: &WorkerConfig) -> Result<Frame, MessageError> {
    let mut frame = Vec::new();
    ciborium::into_writer(config, &mut frame).map_err(|e| MessageError::Encode {
        call_id: CallId::new(0),
        reason: e.to_string(),
    })?;

    Ok(frame)
}

pub(crate) fn decode_config(frame: &[u8]) -> Result<WorkerConfig, MessageError> {
    ciborium::from_reader(frame).map_err(|e| MessageError::Decode {
        call_id: CallId::new(0),
        reason: e.to_string(),
    })
}
