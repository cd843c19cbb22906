//! Control-channel message schema.
//!
//! These are the payloads exchanged between the coordinator and one worker.
//! Transport and framing belong to the channel implementation; the attached
//! connection handle travels beside the payload, never inside it.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{GroupKey, JoinAck, LocalAddress};

/// Coordinator → worker requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ControlRequest {
    /// Offer one connection, attached to the message.
    Deliver(DeliverRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverRequest {
    pub group_key: GroupKey,
}

impl From<DeliverRequest> for ControlRequest {
    fn from(req: DeliverRequest) -> Self {
        ControlRequest::Deliver(req)
    }
}

/// Worker → coordinator reply to a deliver request.
///
/// `accepted = false` means the worker is shutting down and refuses new
/// work. It is a control signal, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverReply {
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InetAddress {
    pub address: String,
    pub port: u16,
}

/// Coordinator → worker answer to a join.
///
/// Serializes as `{"localAddress": {...}}`, `{}` for unaddressable
/// endpoints, or `{"errorCode": n}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAckMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<InetAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid address in join ack: {0}")]
    BadAddress(String),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<JoinAck> for JoinAckMessage {
    fn from(ack: JoinAck) -> Self {
        match ack {
            JoinAck::Ready(LocalAddress::Inet(addr)) => JoinAckMessage {
                local_address: Some(InetAddress {
                    address: addr.ip().to_string(),
                    port: addr.port(),
                }),
                error_code: None,
            },
            JoinAck::Ready(LocalAddress::Unaddressable) => JoinAckMessage::default(),
            JoinAck::Failed(code) => JoinAckMessage {
                local_address: None,
                error_code: Some(code),
            },
        }
    }
}

impl TryFrom<JoinAckMessage> for JoinAck {
    type Error = MessageError;

    fn try_from(msg: JoinAckMessage) -> Result<Self, Self::Error> {
        if let Some(code) = msg.error_code {
            return Ok(JoinAck::Failed(code));
        }
        match msg.local_address {
            Some(inet) => {
                let ip: IpAddr = inet
                    .address
                    .parse()
                    .map_err(|_| MessageError::BadAddress(inet.address.clone()))?;
                Ok(JoinAck::Ready(LocalAddress::Inet(SocketAddr::new(ip, inet.port))))
            }
            None => Ok(JoinAck::Ready(LocalAddress::Unaddressable)),
        }
    }
}
