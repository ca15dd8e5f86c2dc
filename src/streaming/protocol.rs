//! Control-channel messages.
//!
//! Wire format: one JSON object per WebSocket text frame, tagged by `"type"`.
//! Small frames only; buffer bytes travel on the data channel.

use crate::error::{Error, Result};
use crate::streaming::channel::{BufferMeta, BufferSet};
use crate::streaming::session::{ClientId, RenderProfile};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Largest inbound frame accepted, in bytes
pub const MAX_INBOUND_FRAME: usize = 64 * 1024;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    VboUpdate,
    Error,
    GraphSettings,
    ReceivedBuffers,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Hello => "hello",
            MessageType::VboUpdate => "vbo_update",
            MessageType::Error => "error",
            MessageType::GraphSettings => "graph_settings",
            MessageType::ReceivedBuffers => "received_buffers",
        }
    }
}

// =============================================================================
// Client -> server
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Simulation parameters, forwarded verbatim to the tick source
    GraphSettings { payload: Value },

    /// The client finished pulling the last notified set
    ReceivedBuffers {
        /// Client-measured time for the cycle, milliseconds
        elapsed_time: f64,
    },
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::GraphSettings { .. } => MessageType::GraphSettings,
            ClientMessage::ReceivedBuffers { .. } => MessageType::ReceivedBuffers,
        }
    }

    /// Parse and validate one inbound text frame.
    pub fn decode(text: &str) -> Result<Self> {
        if text.len() > MAX_INBOUND_FRAME {
            return Err(Error::Protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                text.len(),
                MAX_INBOUND_FRAME
            )));
        }

        let msg: ClientMessage =
            serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))?;

        if let ClientMessage::ReceivedBuffers { elapsed_time } = &msg {
            if !elapsed_time.is_finite() || *elapsed_time < 0.0 {
                return Err(Error::Protocol(format!(
                    "invalid elapsed_time {}",
                    elapsed_time
                )));
            }
        }

        Ok(msg)
    }
}

// =============================================================================
// Server -> client
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection: the id to use on the data channel
    Hello {
        client_id: ClientId,
        buffers: Vec<String>,
        programs: Vec<String>,
    },

    /// A new buffer set is ready to pull
    VboUpdate {
        cycle: u64,
        tick: u64,
        buffers: BTreeMap<String, BufferMeta>,
        programs: Vec<String>,
    },

    /// An inbound frame was rejected
    Error { reason: String },
}

impl ServerMessage {
    pub fn hello(client_id: ClientId, profile: &RenderProfile) -> Self {
        ServerMessage::Hello {
            client_id,
            buffers: profile.buffers.clone(),
            programs: profile.programs.clone(),
        }
    }

    pub fn vbo_update(cycle: u64, set: &BufferSet) -> Self {
        ServerMessage::VboUpdate {
            cycle,
            tick: set.tick,
            buffers: set.metadata(),
            programs: set.programs.clone(),
        }
    }

    pub fn rejected(err: &Error) -> Self {
        ServerMessage::Error {
            reason: err.to_string(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::Hello { .. } => MessageType::Hello,
            ServerMessage::VboUpdate { .. } => MessageType::VboUpdate,
            ServerMessage::Error { .. } => MessageType::Error,
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Protocol(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
