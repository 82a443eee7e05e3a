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

use super::msg::{Message, MessageType};

#[repr(u8)]
#[derive(Debug, PartialEq, Clone)]
pub enum MessageHeaderError {
    Unspecific = 0,
    ConnectionNotSynchronized = 1,
    BadMessageLength = 2,
    BadMessageType = 3,
    Unknown(u8),
}

impl From<u8> for MessageHeaderError {
    fn from(value: u8) -> Self {
        match value {
            0 => MessageHeaderError::Unspecific,
            1 => MessageHeaderError::ConnectionNotSynchronized,
            2 => MessageHeaderError::BadMessageLength,
            3 => MessageHeaderError::BadMessageType,
            val => MessageHeaderError::Unknown(val),
        }
    }
}

impl MessageHeaderError {
    fn as_u8(&self) -> u8 {
        match self {
            MessageHeaderError::Unspecific => 0,
            MessageHeaderError::ConnectionNotSynchronized => 1,
            MessageHeaderError::BadMessageLength => 2,
            MessageHeaderError::BadMessageType => 3,
            MessageHeaderError::Unknown(val) => *val,
        }
    }
}

#[repr(u8)]
#[derive(Debug, PartialEq, Clone)]
pub enum OpenMessageError {
    Unspecific = 0,
    UnsupportedVersionNumber = 1,
    BadPeerAs = 2,
    BadBgpIdentifier = 3,
    UnsupportedOptionalParameter = 4,
    UnacceptableHoldTime = 6,
    Unknown(u8),
}

impl From<u8> for OpenMessageError {
    fn from(value: u8) -> Self {
        match value {
            0 => OpenMessageError::Unspecific,
            1 => OpenMessageError::UnsupportedVersionNumber,
            2 => OpenMessageError::BadPeerAs,
            3 => OpenMessageError::BadBgpIdentifier,
            4 => OpenMessageError::UnsupportedOptionalParameter,
            6 => OpenMessageError::UnacceptableHoldTime,
            val => OpenMessageError::Unknown(val),
        }
    }
}

impl OpenMessageError {
    fn as_u8(&self) -> u8 {
        match self {
            OpenMessageError::Unspecific => 0,
            OpenMessageError::UnsupportedVersionNumber => 1,
            OpenMessageError::BadPeerAs => 2,
            OpenMessageError::BadBgpIdentifier => 3,
            OpenMessageError::UnsupportedOptionalParameter => 4,
            OpenMessageError::UnacceptableHoldTime => 6,
            OpenMessageError::Unknown(val) => *val,
        }
    }
}

#[repr(u8)]
#[derive(Debug, PartialEq, Clone)]
pub enum UpdateMessageError {
    MalformedAttributeList = 1,
    UnrecognizedWellKnownAttribute = 2,
    MissingWellKnownAttribute = 3,
    AttributeFlagsError = 4,
    AttributeLengthError = 5,
    InvalidOriginAttribute = 6,
    // 7 is deprecated (was AS Routing Loop)
    InvalidNextHopAttribute = 8,
    OptionalAttributeError = 9,
    InvalidNetworkField = 10,
    MalformedAsPath = 11,
    Unknown(u8),
}

impl From<u8> for UpdateMessageError {
    fn from(value: u8) -> Self {
        match value {
            1 => UpdateMessageError::MalformedAttributeList,
            2 => UpdateMessageError::UnrecognizedWellKnownAttribute,
            3 => UpdateMessageError::MissingWellKnownAttribute,
            4 => UpdateMessageError::AttributeFlagsError,
            5 => UpdateMessageError::AttributeLengthError,
            6 => UpdateMessageError::InvalidOriginAttribute,
            8 => UpdateMessageError::InvalidNextHopAttribute,
            9 => UpdateMessageError::OptionalAttributeError,
            10 => UpdateMessageError::InvalidNetworkField,
            11 => UpdateMessageError::MalformedAsPath,
            val => UpdateMessageError::Unknown(val),
        }
    }
}

impl UpdateMessageError {
    fn as_u8(&self) -> u8 {
        match self {
            UpdateMessageError::MalformedAttributeList => 1,
            UpdateMessageError::UnrecognizedWellKnownAttribute => 2,
            UpdateMessageError::MissingWellKnownAttribute => 3,
            UpdateMessageError::AttributeFlagsError => 4,
            UpdateMessageError::AttributeLengthError => 5,
            UpdateMessageError::InvalidOriginAttribute => 6,
            UpdateMessageError::InvalidNextHopAttribute => 8,
            UpdateMessageError::OptionalAttributeError => 9,
            UpdateMessageError::InvalidNetworkField => 10,
            UpdateMessageError::MalformedAsPath => 11,
            UpdateMessageError::Unknown(val) => *val,
        }
    }
}

#[repr(u8)]
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CeaseSubcode {
    AdministrativeShutdown = 2,
    ConnectionRejected = 5,
    ConnectionCollisionResolution = 7,
    Unknown(u8),
}

impl From<u8> for CeaseSubcode {
    fn from(value: u8) -> Self {
        match value {
            2 => CeaseSubcode::AdministrativeShutdown,
            5 => CeaseSubcode::ConnectionRejected,
            7 => CeaseSubcode::ConnectionCollisionResolution,
            val => CeaseSubcode::Unknown(val),
        }
    }
}

impl CeaseSubcode {
    fn as_u8(&self) -> u8 {
        match self {
            CeaseSubcode::AdministrativeShutdown => 2,
            CeaseSubcode::ConnectionRejected => 5,
            CeaseSubcode::ConnectionCollisionResolution => 7,
            CeaseSubcode::Unknown(val) => *val,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum BgpError {
    MessageHeaderError(MessageHeaderError),
    OpenMessageError(OpenMessageError),
    UpdateMessageError(UpdateMessageError),
    HoldTimerExpired,
    FiniteStateMachineError,
    Cease(CeaseSubcode),
    Unknown(u8, u8),
}

impl BgpError {
    fn from_codes(err_code: u8, err_sub_code: u8) -> BgpError {
        match err_code {
            1 => BgpError::MessageHeaderError(MessageHeaderError::from(err_sub_code)),
            2 => BgpError::OpenMessageError(OpenMessageError::from(err_sub_code)),
            3 => BgpError::UpdateMessageError(UpdateMessageError::from(err_sub_code)),
            4 => BgpError::HoldTimerExpired,
            5 => BgpError::FiniteStateMachineError,
            6 => BgpError::Cease(CeaseSubcode::from(err_sub_code)),
            _ => BgpError::Unknown(err_code, err_sub_code),
        }
    }

    fn codes(&self) -> (u8, u8) {
        match self {
            BgpError::MessageHeaderError(sub) => (1, sub.as_u8()),
            BgpError::OpenMessageError(sub) => (2, sub.as_u8()),
            BgpError::UpdateMessageError(sub) => (3, sub.as_u8()),
            BgpError::HoldTimerExpired => (4, 0),
            BgpError::FiniteStateMachineError => (5, 0),
            BgpError::Cease(sub) => (6, sub.as_u8()),
            BgpError::Unknown(code, sub) => (*code, *sub),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct NotificationMessage {
    error: BgpError,
    data: Vec<u8>,
}

impl NotificationMessage {
    pub fn new(error: BgpError, data: Vec<u8>) -> Self {
        NotificationMessage { error, data }
    }

    pub fn error(&self) -> &BgpError {
        &self.error
    }

    /// Body layout: error code, error subcode, then diagnostic data.
    /// Callers have already validated the minimum body length of 2.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let error = BgpError::from_codes(bytes[0], bytes[1]);
        NotificationMessage {
            error,
            data: bytes[2..].to_vec(),
        }
    }
}

impl Message for NotificationMessage {
    fn kind(&self) -> MessageType {
        MessageType::Notification
    }

    fn to_bytes(&self) -> Vec<u8> {
        let (code, subcode) = self.error.codes();
        let mut bytes = vec![code, subcode];
        bytes.extend_from_slice(&self.data);
        bytes
    }
}
