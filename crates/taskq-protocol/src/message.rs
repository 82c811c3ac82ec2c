use crate::Result;
use serde::{Deserialize, Serialize};
use taskq_core::{AckId, Delivery};

/// Message types for the broker TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Enqueue = 1,
    Dequeue = 2,
    Acknowledge = 3,
    QueueSize = 4,
    Purge = 5,
    Ping = 6,
    CacheGet = 7,
    CacheSet = 8,
    CacheDelete = 9,
    CacheClear = 10,
    Ack = 11,
    Nack = 12,
    Renew = 13,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Enqueue),
            2 => Some(MessageType::Dequeue),
            3 => Some(MessageType::Acknowledge),
            4 => Some(MessageType::QueueSize),
            5 => Some(MessageType::Purge),
            6 => Some(MessageType::Ping),
            7 => Some(MessageType::CacheGet),
            8 => Some(MessageType::CacheSet),
            9 => Some(MessageType::CacheDelete),
            10 => Some(MessageType::CacheClear),
            11 => Some(MessageType::Ack),
            12 => Some(MessageType::Nack),
            13 => Some(MessageType::Renew),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages. Requests flow client -> server, `Ack`/`Nack` answer them.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Append a payload to the queue
    Enqueue(EnqueueRequest),

    /// Take the oldest payload, if any
    Dequeue,

    /// Confirm a delivery has been fully handled
    Acknowledge(AcknowledgeRequest),

    /// Extend the lease of a delivery still being handled
    Renew(RenewRequest),

    /// Number of payloads waiting
    QueueSize,

    /// Drop every waiting payload
    Purge,

    /// Liveness probe
    Ping,

    CacheGet(CacheKeyRequest),
    CacheSet(CacheSetRequest),
    CacheDelete(CacheKeyRequest),
    CacheClear,

    /// Positive acknowledgment
    Ack(AckResponse),

    /// Negative acknowledgment
    Nack(NackResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Enqueue(_) => MessageType::Enqueue,
            Message::Dequeue => MessageType::Dequeue,
            Message::Acknowledge(_) => MessageType::Acknowledge,
            Message::Renew(_) => MessageType::Renew,
            Message::QueueSize => MessageType::QueueSize,
            Message::Purge => MessageType::Purge,
            Message::Ping => MessageType::Ping,
            Message::CacheGet(_) => MessageType::CacheGet,
            Message::CacheSet(_) => MessageType::CacheSet,
            Message::CacheDelete(_) => MessageType::CacheDelete,
            Message::CacheClear => MessageType::CacheClear,
            Message::Ack(_) => MessageType::Ack,
            Message::Nack(_) => MessageType::Nack,
        }
    }

    /// Encode the message body (everything after the type byte)
    pub(crate) fn encode_body(&self) -> Result<Vec<u8>> {
        let body = match self {
            Message::Enqueue(req) => bincode::serialize(req)?,
            Message::Acknowledge(req) => bincode::serialize(req)?,
            Message::Renew(req) => bincode::serialize(req)?,
            Message::CacheGet(req) | Message::CacheDelete(req) => bincode::serialize(req)?,
            Message::CacheSet(req) => bincode::serialize(req)?,
            Message::Ack(resp) => bincode::serialize(resp)?,
            Message::Nack(resp) => bincode::serialize(resp)?,
            Message::Dequeue
            | Message::QueueSize
            | Message::Purge
            | Message::Ping
            | Message::CacheClear => Vec::new(),
        };
        Ok(body)
    }

    /// Decode a body previously produced by `encode_body`
    pub(crate) fn decode_body(message_type: MessageType, body: &[u8]) -> Result<Self> {
        let message = match message_type {
            MessageType::Enqueue => Message::Enqueue(bincode::deserialize(body)?),
            MessageType::Dequeue => Message::Dequeue,
            MessageType::Acknowledge => Message::Acknowledge(bincode::deserialize(body)?),
            MessageType::Renew => Message::Renew(bincode::deserialize(body)?),
            MessageType::QueueSize => Message::QueueSize,
            MessageType::Purge => Message::Purge,
            MessageType::Ping => Message::Ping,
            MessageType::CacheGet => Message::CacheGet(bincode::deserialize(body)?),
            MessageType::CacheSet => Message::CacheSet(bincode::deserialize(body)?),
            MessageType::CacheDelete => Message::CacheDelete(bincode::deserialize(body)?),
            MessageType::CacheClear => Message::CacheClear,
            MessageType::Ack => Message::Ack(bincode::deserialize(body)?),
            MessageType::Nack => Message::Nack(bincode::deserialize(body)?),
        };
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgeRequest {
    pub ack: AckId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewRequest {
    pub ack: AckId,
    pub lease_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKeyRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSetRequest {
    pub key: String,
    pub value: Vec<u8>,
    /// Entry lifetime in milliseconds (None = no expiry)
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Returned by `Dequeue` when a payload was available
    pub delivery: Option<Delivery>,
    /// Returned by `CacheGet` on a hit
    pub value: Option<Vec<u8>>,
    /// Returned by `QueueSize`
    pub size: Option<u64>,
    /// Returned by `Renew`: whether the delivery is still leased
    pub held: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NackResponse {
    pub error: String,
    /// Whether the caller may retry the request
    pub transient: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::Enqueue));
        assert_eq!(MessageType::from_u8(12), Some(MessageType::Nack));
        assert_eq!(MessageType::from_u8(13), Some(MessageType::Renew));
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(99), None);

        assert_eq!(MessageType::CacheSet.as_u8(), 8);
        assert_eq!(Message::Ping.message_type(), MessageType::Ping);
    }

    #[test]
    fn test_unit_requests_have_empty_body() {
        for message in [Message::Dequeue, Message::QueueSize, Message::Purge, Message::CacheClear] {
            assert!(message.encode_body().unwrap().is_empty());
        }
    }
}
