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
use super::msg_notification::{BgpError, UpdateMessageError};
use super::utils::{encode_prefix_list, parse_prefix_list, read_u32, Ipv4Net, ParserError};
use std::net::Ipv4Addr;

const WITHDRAWN_ROUTES_LENGTH_SIZE: usize = 2;
const TOTAL_ATTR_LENGTH_SIZE: usize = 2;

mod attr_flags {
    pub const OPTIONAL: u8 = 1 << 7;
    pub const TRANSITIVE: u8 = 1 << 6;
    pub const PARTIAL: u8 = 1 << 5;
    pub const EXTENDED_LENGTH: u8 = 1 << 4;
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

impl TryFrom<u8> for Origin {
    type Error = ParserError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Origin::Igp),
            1 => Ok(Origin::Egp),
            2 => Ok(Origin::Incomplete),
            _ => Err(ParserError::BgpError {
                error: BgpError::UpdateMessageError(UpdateMessageError::InvalidOriginAttribute),
                data: vec![value],
            }),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AsPathSegmentType {
    AsSet = 1,
    AsSequence = 2,
}

impl TryFrom<u8> for AsPathSegmentType {
    type Error = ParserError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AsPathSegmentType::AsSet),
            2 => Ok(AsPathSegmentType::AsSequence),
            _ => Err(ParserError::BgpError {
                error: BgpError::UpdateMessageError(UpdateMessageError::MalformedAsPath),
                data: Vec::new(),
            }),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct AsPathSegment {
    pub segment_type: AsPathSegmentType,
    pub asn_list: Vec<u16>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum PathAttrValue {
    Origin(Origin),
    AsPath(Vec<AsPathSegment>),
    NextHop(Ipv4Addr),
    MultiExitDisc(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator { asn: u16, ip_addr: Ipv4Addr },
}

#[derive(Debug, PartialEq, Clone)]
pub struct PathAttribute {
    pub flags: u8,
    pub value: PathAttrValue,
}

mod attr_type_code {
    pub const ORIGIN: u8 = 1;
    pub const AS_PATH: u8 = 2;
    pub const NEXT_HOP: u8 = 3;
    pub const MULTI_EXIT_DISC: u8 = 4;
    pub const LOCAL_PREF: u8 = 5;
    pub const ATOMIC_AGGREGATE: u8 = 6;
    pub const AGGREGATOR: u8 = 7;
}

impl PathAttrValue {
    fn type_code(&self) -> u8 {
        match self {
            PathAttrValue::Origin(_) => attr_type_code::ORIGIN,
            PathAttrValue::AsPath(_) => attr_type_code::AS_PATH,
            PathAttrValue::NextHop(_) => attr_type_code::NEXT_HOP,
            PathAttrValue::MultiExitDisc(_) => attr_type_code::MULTI_EXIT_DISC,
            PathAttrValue::LocalPref(_) => attr_type_code::LOCAL_PREF,
            PathAttrValue::AtomicAggregate => attr_type_code::ATOMIC_AGGREGATE,
            PathAttrValue::Aggregator { .. } => attr_type_code::AGGREGATOR,
        }
    }

    /// Well-known flags are TRANSITIVE; MED is OPTIONAL; AGGREGATOR is both.
    fn wire_flags(&self) -> u8 {
        match self {
            PathAttrValue::MultiExitDisc(_) => attr_flags::OPTIONAL,
            PathAttrValue::Aggregator { .. } => attr_flags::OPTIONAL | attr_flags::TRANSITIVE,
            _ => attr_flags::TRANSITIVE,
        }
    }

    fn value_bytes(&self) -> Vec<u8> {
        match self {
            PathAttrValue::Origin(origin) => vec![*origin as u8],
            PathAttrValue::AsPath(segments) => {
                let mut bytes = Vec::new();
                for segment in segments {
                    bytes.push(segment.segment_type as u8);
                    bytes.push(segment.asn_list.len() as u8);
                    for asn in &segment.asn_list {
                        bytes.extend_from_slice(&asn.to_be_bytes());
                    }
                }
                bytes
            }
            PathAttrValue::NextHop(addr) => addr.octets().to_vec(),
            PathAttrValue::MultiExitDisc(val) | PathAttrValue::LocalPref(val) => {
                val.to_be_bytes().to_vec()
            }
            PathAttrValue::AtomicAggregate => Vec::new(),
            PathAttrValue::Aggregator { asn, ip_addr } => {
                let mut bytes = asn.to_be_bytes().to_vec();
                bytes.extend_from_slice(&ip_addr.octets());
                bytes
            }
        }
    }
}

fn attr_flags_error(flags: u8, type_code: u8, value: &[u8]) -> ParserError {
    let mut data = vec![flags, type_code];
    data.extend_from_slice(value);
    ParserError::BgpError {
        error: BgpError::UpdateMessageError(UpdateMessageError::AttributeFlagsError),
        data,
    }
}

fn read_as_path(bytes: &[u8]) -> Result<Vec<AsPathSegment>, ParserError> {
    let malformed = || ParserError::BgpError {
        error: BgpError::UpdateMessageError(UpdateMessageError::MalformedAsPath),
        data: Vec::new(),
    };

    let mut segments = Vec::new();
    let mut cursor = 0;

    while cursor < bytes.len() {
        if cursor + 2 > bytes.len() {
            return Err(malformed());
        }
        let segment_type = AsPathSegmentType::try_from(bytes[cursor])?;
        let segment_len = bytes[cursor + 1] as usize;
        cursor += 2;

        if cursor + segment_len * 2 > bytes.len() {
            return Err(malformed());
        }
        let asn_list = (0..segment_len)
            .map(|i| {
                let pos = cursor + i * 2;
                u16::from_be_bytes([bytes[pos], bytes[pos + 1]])
            })
            .collect();
        cursor += segment_len * 2;

        segments.push(AsPathSegment {
            segment_type,
            asn_list,
        });
    }

    Ok(segments)
}

/// Returns `Ok(None)` for unrecognized optional attributes, which are
/// skipped; unrecognized well-known attributes are an error (RFC 4271
/// Section 6.3).
fn read_path_attribute(
    type_code: u8,
    flags: u8,
    value: &[u8],
) -> Result<Option<PathAttribute>, ParserError> {
    let length_error = || ParserError::BgpError {
        error: BgpError::UpdateMessageError(UpdateMessageError::AttributeLengthError),
        data: Vec::new(),
    };

    let parsed = match type_code {
        attr_type_code::ORIGIN => {
            if value.len() != 1 {
                return Err(length_error());
            }
            PathAttrValue::Origin(Origin::try_from(value[0])?)
        }
        attr_type_code::AS_PATH => PathAttrValue::AsPath(read_as_path(value)?),
        attr_type_code::NEXT_HOP => {
            if value.len() != 4 {
                return Err(ParserError::BgpError {
                    error: BgpError::UpdateMessageError(
                        UpdateMessageError::InvalidNextHopAttribute,
                    ),
                    data: value.to_vec(),
                });
            }
            PathAttrValue::NextHop(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
        }
        attr_type_code::MULTI_EXIT_DISC => PathAttrValue::MultiExitDisc(read_u32(value)?),
        attr_type_code::LOCAL_PREF => PathAttrValue::LocalPref(read_u32(value)?),
        attr_type_code::ATOMIC_AGGREGATE => {
            if !value.is_empty() {
                return Err(length_error());
            }
            PathAttrValue::AtomicAggregate
        }
        attr_type_code::AGGREGATOR => {
            if value.len() != 6 {
                return Err(length_error());
            }
            PathAttrValue::Aggregator {
                asn: u16::from_be_bytes([value[0], value[1]]),
                ip_addr: Ipv4Addr::new(value[2], value[3], value[4], value[5]),
            }
        }
        _ => {
            if flags & attr_flags::OPTIONAL != 0 {
                return Ok(None);
            }
            return Err(ParserError::BgpError {
                error: BgpError::UpdateMessageError(
                    UpdateMessageError::UnrecognizedWellKnownAttribute,
                ),
                data: vec![type_code],
            });
        }
    };

    // Well-known attributes must not carry the Partial bit
    if flags & attr_flags::OPTIONAL == 0 && flags & attr_flags::PARTIAL != 0 {
        return Err(attr_flags_error(flags, type_code, value));
    }

    Ok(Some(PathAttribute {
        flags,
        value: parsed,
    }))
}

fn read_path_attributes(bytes: &[u8]) -> Result<Vec<PathAttribute>, ParserError> {
    let malformed = || ParserError::BgpError {
        error: BgpError::UpdateMessageError(UpdateMessageError::MalformedAttributeList),
        data: Vec::new(),
    };

    let mut attrs = Vec::new();
    let mut cursor = 0;

    while cursor < bytes.len() {
        if cursor + 3 > bytes.len() {
            return Err(malformed());
        }
        let flags = bytes[cursor];
        let type_code = bytes[cursor + 1];
        cursor += 2;

        let attr_len = if flags & attr_flags::EXTENDED_LENGTH != 0 {
            if cursor + 2 > bytes.len() {
                return Err(malformed());
            }
            let len = u16::from_be_bytes([bytes[cursor], bytes[cursor + 1]]) as usize;
            cursor += 2;
            len
        } else {
            let len = bytes[cursor] as usize;
            cursor += 1;
            len
        };

        if cursor + attr_len > bytes.len() {
            return Err(malformed());
        }
        if let Some(attr) = read_path_attribute(type_code, flags, &bytes[cursor..cursor + attr_len])?
        {
            attrs.push(attr);
        }
        cursor += attr_len;
    }

    Ok(attrs)
}

#[derive(Debug, PartialEq, Clone)]
pub struct UpdateMessage {
    pub withdrawn_routes: Vec<Ipv4Net>,
    pub path_attrs: Vec<PathAttribute>,
    pub nlri: Vec<Ipv4Net>,
}

impl UpdateMessage {
    pub fn new(
        withdrawn_routes: Vec<Ipv4Net>,
        path_attrs: Vec<PathAttrValue>,
        nlri: Vec<Ipv4Net>,
    ) -> Self {
        UpdateMessage {
            withdrawn_routes,
            path_attrs: path_attrs
                .into_iter()
                .map(|value| PathAttribute {
                    flags: value.wire_flags(),
                    value,
                })
                .collect(),
            nlri,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ParserError> {
        let malformed = || ParserError::BgpError {
            error: BgpError::UpdateMessageError(UpdateMessageError::MalformedAttributeList),
            data: Vec::new(),
        };

        if bytes.len() < WITHDRAWN_ROUTES_LENGTH_SIZE {
            return Err(malformed());
        }
        let withdrawn_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let mut cursor = WITHDRAWN_ROUTES_LENGTH_SIZE;

        if cursor + withdrawn_len + TOTAL_ATTR_LENGTH_SIZE > bytes.len() {
            return Err(malformed());
        }
        let withdrawn_routes = parse_prefix_list(&bytes[cursor..cursor + withdrawn_len])?;
        cursor += withdrawn_len;

        let attrs_len = u16::from_be_bytes([bytes[cursor], bytes[cursor + 1]]) as usize;
        cursor += TOTAL_ATTR_LENGTH_SIZE;

        if cursor + attrs_len > bytes.len() {
            return Err(malformed());
        }
        let path_attrs = read_path_attributes(&bytes[cursor..cursor + attrs_len])?;
        cursor += attrs_len;

        let nlri = parse_prefix_list(&bytes[cursor..])?;

        // RFC 4271 Section 6.3: NLRI requires the mandatory attributes
        if !nlri.is_empty() {
            let update = UpdateMessage {
                withdrawn_routes,
                path_attrs,
                nlri,
            };
            for required in [
                attr_type_code::ORIGIN,
                attr_type_code::AS_PATH,
                attr_type_code::NEXT_HOP,
            ] {
                if !update
                    .path_attrs
                    .iter()
                    .any(|a| a.value.type_code() == required)
                {
                    return Err(ParserError::BgpError {
                        error: BgpError::UpdateMessageError(
                            UpdateMessageError::MissingWellKnownAttribute,
                        ),
                        data: vec![required],
                    });
                }
            }
            return Ok(update);
        }

        Ok(UpdateMessage {
            withdrawn_routes,
            path_attrs,
            nlri,
        })
    }

    pub fn origin(&self) -> Option<Origin> {
        self.path_attrs.iter().find_map(|a| match &a.value {
            PathAttrValue::Origin(origin) => Some(*origin),
            _ => None,
        })
    }

    /// Flattened AS numbers across all AS_PATH segments.
    pub fn as_path(&self) -> Vec<u16> {
        self.path_attrs
            .iter()
            .find_map(|a| match &a.value {
                PathAttrValue::AsPath(segments) => Some(
                    segments
                        .iter()
                        .flat_map(|s| s.asn_list.iter().copied())
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn next_hop(&self) -> Option<Ipv4Addr> {
        self.path_attrs.iter().find_map(|a| match &a.value {
            PathAttrValue::NextHop(addr) => Some(*addr),
            _ => None,
        })
    }

    pub fn med(&self) -> Option<u32> {
        self.path_attrs.iter().find_map(|a| match &a.value {
            PathAttrValue::MultiExitDisc(val) => Some(*val),
            _ => None,
        })
    }

    pub fn local_pref(&self) -> Option<u32> {
        self.path_attrs.iter().find_map(|a| match &a.value {
            PathAttrValue::LocalPref(val) => Some(*val),
            _ => None,
        })
    }
}

impl Message for UpdateMessage {
    fn kind(&self) -> MessageType {
        MessageType::Update
    }

    fn to_bytes(&self) -> Vec<u8> {
        let withdrawn = encode_prefix_list(&self.withdrawn_routes);

        let mut attrs = Vec::new();
        for attr in &self.path_attrs {
            let value = attr.value.value_bytes();
            if value.len() > u8::MAX as usize {
                attrs.push(attr.flags | attr_flags::EXTENDED_LENGTH);
                attrs.push(attr.value.type_code());
                attrs.extend_from_slice(&(value.len() as u16).to_be_bytes());
            } else {
                attrs.push(attr.flags & !attr_flags::EXTENDED_LENGTH);
                attrs.push(attr.value.type_code());
                attrs.push(value.len() as u8);
            }
            attrs.extend_from_slice(&value);
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(withdrawn.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&withdrawn);
        bytes.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&attrs);
        bytes.extend_from_slice(&encode_prefix_list(&self.nlri));
        bytes
    }
}
