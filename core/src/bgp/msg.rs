// Copyright 2025 bgped Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::msg_keepalive::KeepAliveMessage;
use super::msg_notification::{BgpError, MessageHeaderError, NotificationMessage};
use super::msg_open::OpenMessage;
use super::msg_update::UpdateMessage;
use super::utils::ParserError;

pub const BGP_HEADER_SIZE_BYTES: usize = 19;
pub const MAX_MESSAGE_SIZE: u16 = 4096;

// BGP header marker (16 bytes of 0xFF)
pub const BGP_MARKER: [u8; 16] = [0xff; 16];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    KeepAlive = 4,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ParserError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Open),
            2 => Ok(MessageType::Update),
            3 => Ok(MessageType::Notification),
            4 => Ok(MessageType::KeepAlive),
            _ => Err(ParserError::BgpError {
                error: BgpError::MessageHeaderError(MessageHeaderError::BadMessageType),
                data: vec![value],
            }),
        }
    }
}

/// Trait for BGP message types that can serialize themselves
pub trait Message {
    /// Returns the message type identifier
    fn kind(&self) -> MessageType;

    /// Serializes the message body (without BGP header)
    fn to_bytes(&self) -> Vec<u8>;

    /// Serializes the complete BGP message with header
    fn serialize(&self) -> Vec<u8> {
        let body = self.to_bytes();
        let mut message = Vec::new();

        message.extend_from_slice(&BGP_MARKER);

        // Message length (header + body)
        let length = BGP_HEADER_SIZE_BYTES as u16 + body.len() as u16;
        message.extend_from_slice(&length.to_be_bytes());

        message.push(self.kind().as_u8());
        message.extend_from_slice(&body);

        message
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum BgpMessage {
    Open(OpenMessage),
    Update(UpdateMessage),
    KeepAlive(KeepAliveMessage),
    Notification(NotificationMessage),
}

impl BgpMessage {
    pub fn kind(&self) -> MessageType {
        match self {
            BgpMessage::Open(_) => MessageType::Open,
            BgpMessage::Update(_) => MessageType::Update,
            BgpMessage::KeepAlive(_) => MessageType::KeepAlive,
            BgpMessage::Notification(_) => MessageType::Notification,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            BgpMessage::Open(m) => m.serialize(),
            BgpMessage::Update(m) => m.serialize(),
            BgpMessage::KeepAlive(m) => m.serialize(),
            BgpMessage::Notification(m) => m.serialize(),
        }
    }

    fn from_body(message_type: MessageType, bytes: Vec<u8>) -> Result<Self, ParserError> {
        match message_type {
            MessageType::Open => Ok(BgpMessage::Open(OpenMessage::from_bytes(bytes)?)),
            MessageType::Update => Ok(BgpMessage::Update(UpdateMessage::from_bytes(bytes)?)),
            MessageType::KeepAlive => Ok(BgpMessage::KeepAlive(KeepAliveMessage {})),
            MessageType::Notification => Ok(BgpMessage::Notification(
                NotificationMessage::from_bytes(bytes),
            )),
        }
    }
}

/// Read the message length from a header prefix. The caller must supply at
/// least the 19-byte header.
pub fn header_length(prefix: &[u8]) -> u16 {
    debug_assert!(prefix.len() >= BGP_HEADER_SIZE_BYTES);
    u16::from_be_bytes([prefix[16], prefix[17]])
}

/// Parse exactly one complete BGP message, header included.
pub fn parse(bytes: &[u8]) -> Result<BgpMessage, ParserError> {
    if bytes.len() < BGP_HEADER_SIZE_BYTES {
        return Err(ParserError::BgpError {
            error: BgpError::MessageHeaderError(MessageHeaderError::BadMessageLength),
            data: (bytes.len() as u16).to_be_bytes().to_vec(),
        });
    }

    validate_marker(bytes)?;

    let message_length = header_length(bytes);
    let message_type = bytes[18];

    validate_length(message_length, message_type)?;
    if message_length as usize != bytes.len() {
        return Err(ParserError::BgpError {
            error: BgpError::MessageHeaderError(MessageHeaderError::BadMessageLength),
            data: message_length.to_be_bytes().to_vec(),
        });
    }

    let message_type = MessageType::try_from(message_type)?;
    BgpMessage::from_body(message_type, bytes[BGP_HEADER_SIZE_BYTES..].to_vec())
}

fn validate_marker(header: &[u8]) -> Result<(), ParserError> {
    if header[0..16] != BGP_MARKER {
        return Err(ParserError::BgpError {
            error: BgpError::MessageHeaderError(MessageHeaderError::ConnectionNotSynchronized),
            data: Vec::new(),
        });
    }
    Ok(())
}

fn validate_length(message_length: u16, message_type: u8) -> Result<(), ParserError> {
    let bad_length = |length: u16| ParserError::BgpError {
        error: BgpError::MessageHeaderError(MessageHeaderError::BadMessageLength),
        data: length.to_be_bytes().to_vec(),
    };

    if message_length < BGP_HEADER_SIZE_BYTES as u16 || message_length > MAX_MESSAGE_SIZE {
        return Err(bad_length(message_length));
    }

    // Message-type-specific length floors (RFC 4271 Section 6.1)
    if message_type == MessageType::KeepAlive.as_u8()
        && message_length != BGP_HEADER_SIZE_BYTES as u16
    {
        return Err(bad_length(message_length));
    }
    if message_type == MessageType::Notification.as_u8() && message_length < 21 {
        return Err(bad_length(message_length));
    }
    if message_type == MessageType::Open.as_u8() && message_length < 29 {
        return Err(bad_length(message_length));
    }

    Ok(())
}
