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
use super::msg_notification::{BgpError, OpenMessageError};
use super::utils::{is_valid_unicast_ipv4, ParserError};

pub const BGP_VERSION: u8 = 4;

/// OPEN message. This speaker negotiates no capabilities, so the optional
/// parameters list is always empty on send; non-empty lists from the peer
/// are rejected.
#[derive(Debug, PartialEq, Clone)]
pub struct OpenMessage {
    pub version: u8,
    pub asn: u16,
    pub hold_time: u16,
    pub bgp_identifier: u32,
}

/// Validate BGP version (RFC 4271 Section 6.2)
fn validate_version(version: u8) -> Result<(), ParserError> {
    if version != BGP_VERSION {
        // Data field is the largest locally-supported version number
        return Err(ParserError::BgpError {
            error: BgpError::OpenMessageError(OpenMessageError::UnsupportedVersionNumber),
            data: (BGP_VERSION as u16).to_be_bytes().to_vec(),
        });
    }
    Ok(())
}

/// Validate Hold Time (RFC 4271 Section 6.2)
/// MUST reject Hold Time values of one or two seconds
fn validate_hold_time(hold_time: u16) -> Result<(), ParserError> {
    if hold_time == 1 || hold_time == 2 {
        return Err(ParserError::BgpError {
            error: BgpError::OpenMessageError(OpenMessageError::UnacceptableHoldTime),
            data: Vec::new(),
        });
    }
    Ok(())
}

/// Validate BGP Identifier (RFC 4271 Section 6.2)
/// Must be a valid unicast IP host address.
fn validate_bgp_identifier(bgp_identifier: u32) -> Result<(), ParserError> {
    if !is_valid_unicast_ipv4(bgp_identifier) {
        return Err(ParserError::BgpError {
            error: BgpError::OpenMessageError(OpenMessageError::BadBgpIdentifier),
            data: Vec::new(),
        });
    }
    Ok(())
}

impl OpenMessage {
    pub fn new(asn: u16, hold_time: u16, bgp_identifier: u32) -> Self {
        OpenMessage {
            version: BGP_VERSION,
            asn,
            hold_time,
            bgp_identifier,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ParserError> {
        if bytes.len() < 10 {
            return Err(ParserError::BgpError {
                error: BgpError::OpenMessageError(OpenMessageError::Unspecific),
                data: Vec::new(),
            });
        }

        let version = bytes[0];
        let asn = u16::from_be_bytes([bytes[1], bytes[2]]);
        let hold_time = u16::from_be_bytes([bytes[3], bytes[4]]);
        let bgp_identifier = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let optional_params_len = bytes[9];

        if optional_params_len as usize != bytes.len() - 10 {
            return Err(ParserError::BgpError {
                error: BgpError::OpenMessageError(OpenMessageError::Unspecific),
                data: Vec::new(),
            });
        }

        // RFC 4271 Section 6.2: validate OPEN message fields
        validate_version(version)?;
        validate_hold_time(hold_time)?;
        validate_bgp_identifier(bgp_identifier)?;

        // No capability negotiation: any optional parameter is unsupported
        if optional_params_len != 0 {
            return Err(ParserError::BgpError {
                error: BgpError::OpenMessageError(OpenMessageError::UnsupportedOptionalParameter),
                data: Vec::new(),
            });
        }

        Ok(OpenMessage {
            version,
            asn,
            hold_time,
            bgp_identifier,
        })
    }
}

impl Message for OpenMessage {
    fn kind(&self) -> MessageType {
        MessageType::Open
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.push(self.version);
        bytes.extend_from_slice(&self.asn.to_be_bytes());
        bytes.extend_from_slice(&self.hold_time.to_be_bytes());
        bytes.extend_from_slice(&self.bgp_identifier.to_be_bytes());
        bytes.push(0); // optional parameters length
        bytes
    }
}
