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

//! Framed BGP message I/O over a byte-stream transport.
//!
//! The transport may deliver any chunking; the reader reassembles exactly
//! one message per `read()`. The header is 19 bytes and carries the total
//! message length, so at least 19 residual bytes are required before the
//! length field is consulted.

use crate::bgp::msg::{self, BgpMessage, BGP_HEADER_SIZE_BYTES, MAX_MESSAGE_SIZE};
use crate::bgp::msg_notification::{BgpError, MessageHeaderError};
use crate::bgp::utils::ParserError;
use bytes::BytesMut;
use std::fmt::{Display, Formatter};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, PartialEq)]
pub enum ReadError {
    /// The transport reached end of stream.
    Closed,
    Refused,
    Timeout,
    Parse(ParserError),
    /// Any other transport error. Fatal to the reader.
    TransportOther(String),
}

impl Display for ReadError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ReadError::Closed => write!(f, "connection closed"),
            ReadError::Refused => write!(f, "connection refused"),
            ReadError::Timeout => write!(f, "transport timeout"),
            ReadError::Parse(e) => write!(f, "parse error: {}", e),
            ReadError::TransportOther(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for ReadError {}

#[derive(Debug, PartialEq)]
pub enum WriteError {
    Closed,
    Refused,
    Timeout,
    TransportOther(String),
}

impl Display for WriteError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            WriteError::Closed => write!(f, "connection closed"),
            WriteError::Refused => write!(f, "connection refused"),
            WriteError::Timeout => write!(f, "transport timeout"),
            WriteError::TransportOther(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for WriteError {}

fn classify_read(err: io::Error) -> ReadError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ReadError::Closed,
        io::ErrorKind::ConnectionRefused => ReadError::Refused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ReadError::Timeout,
        _ => ReadError::TransportOther(err.to_string()),
    }
}

fn classify_write(err: io::Error) -> WriteError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => WriteError::Closed,
        io::ErrorKind::ConnectionRefused => WriteError::Refused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => WriteError::Timeout,
        _ => WriteError::TransportOther(err.to_string()),
    }
}

/// Reassembles BGP messages from a byte stream. Callers must serialize
/// `read()` calls; the reader holds at most one partial message of
/// residual.
pub struct MessageReader<R> {
    transport: R,
    residual: Option<BytesMut>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(transport: R) -> Self {
        MessageReader {
            transport,
            residual: None,
        }
    }

    /// Read exactly one BGP message, pulling from the transport as needed.
    pub async fn read(&mut self) -> Result<BgpMessage, ReadError> {
        loop {
            if let Some(buf) = self.residual.as_ref() {
                if buf.len() >= BGP_HEADER_SIZE_BYTES {
                    let message_length = msg::header_length(buf) as usize;

                    // A length outside [19, 4096] can never complete;
                    // reject before waiting for more bytes.
                    if message_length < BGP_HEADER_SIZE_BYTES
                        || message_length > MAX_MESSAGE_SIZE as usize
                    {
                        self.residual = None;
                        return Err(ReadError::Parse(ParserError::BgpError {
                            error: BgpError::MessageHeaderError(
                                MessageHeaderError::BadMessageLength,
                            ),
                            data: (message_length as u16).to_be_bytes().to_vec(),
                        }));
                    }

                    if buf.len() >= message_length {
                        let mut buf = self.residual.take().expect("checked above");
                        let frame = buf.split_to(message_length);
                        if !buf.is_empty() {
                            self.residual = Some(buf);
                        }
                        return msg::parse(&frame).map_err(ReadError::Parse);
                    }
                }
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<(), ReadError> {
        let mut buf = self
            .residual
            .take()
            .unwrap_or_else(|| BytesMut::with_capacity(MAX_MESSAGE_SIZE as usize));
        let n = self
            .transport
            .read_buf(&mut buf)
            .await
            .map_err(classify_read)?;
        if n == 0 {
            return Err(ReadError::Closed);
        }
        self.residual = Some(buf);
        Ok(())
    }
}

/// Stateless writer: encode and issue a single transport write.
pub struct MessageWriter<W> {
    transport: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(transport: W) -> Self {
        MessageWriter { transport }
    }

    pub async fn write(&mut self, message: &BgpMessage) -> Result<(), WriteError> {
        self.transport
            .write_all(&message.serialize())
            .await
            .map_err(classify_write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgp::msg::Message;
    use crate::bgp::msg_keepalive::KeepAliveMessage;
    use crate::bgp::msg_open::OpenMessage;
    use crate::bgp::msg_update::{
        AsPathSegment, AsPathSegmentType, Origin, PathAttrValue, UpdateMessage,
    };
    use crate::bgp::utils::Ipv4Net;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;

    fn test_update_message(nlri: Vec<Ipv4Net>) -> UpdateMessage {
        UpdateMessage::new(
            vec![],
            vec![
                PathAttrValue::Origin(Origin::Igp),
                PathAttrValue::AsPath(vec![AsPathSegment {
                    segment_type: AsPathSegmentType::AsSequence,
                    asn_list: vec![65001],
                }]),
                PathAttrValue::NextHop(Ipv4Addr::new(10, 0, 0, 1)),
            ],
            nlri,
        )
    }

    #[tokio::test]
    async fn test_read_across_arbitrary_chunks() {
        // A 19-byte KEEPALIVE followed by a 100-byte UPDATE, delivered as
        // three fragments that straddle both message boundaries.
        let keepalive = KeepAliveMessage {}.serialize();
        let mut nlri: Vec<Ipv4Net> = (0..14)
            .map(|i| Ipv4Net {
                address: Ipv4Addr::new(10, i, 1, 0),
                prefix_length: 24,
            })
            .collect();
        nlri.push(Ipv4Net {
            address: Ipv4Addr::new(172, 16, 0, 0),
            prefix_length: 16,
        });
        let update = BgpMessage::Update(test_update_message(nlri));
        let update_bytes = update.serialize();
        assert_eq!(update_bytes.len(), 100);

        let mut stream: Vec<u8> = Vec::new();
        stream.extend_from_slice(&keepalive);
        stream.extend_from_slice(&update_bytes);

        let (client, server) = tokio::io::duplex(256);
        let mut reader = MessageReader::new(server);

        let chunks: Vec<Vec<u8>> = vec![
            stream[0..7].to_vec(),
            stream[7..19].to_vec(),
            stream[19..].to_vec(),
        ];
        let writer_task = tokio::spawn(async move {
            let mut client = client;
            for chunk in chunks {
                client.write_all(&chunk).await.unwrap();
                client.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            client
        });

        let first = reader.read().await.unwrap();
        assert_eq!(first, BgpMessage::KeepAlive(KeepAliveMessage {}));

        let second = reader.read().await.unwrap();
        assert_eq!(second, update);

        drop(writer_task.await.unwrap());
        assert_eq!(reader.read().await, Err(ReadError::Closed));
    }

    #[tokio::test]
    async fn test_read_coalesced_messages() {
        // Several messages arriving in a single chunk come out one per read.
        let messages = vec![
            BgpMessage::Open(OpenMessage::new(65001, 45, 0x01010101)),
            BgpMessage::KeepAlive(KeepAliveMessage {}),
            BgpMessage::Update(test_update_message(vec![Ipv4Net {
                address: Ipv4Addr::new(10, 1, 0, 0),
                prefix_length: 16,
            }])),
            BgpMessage::KeepAlive(KeepAliveMessage {}),
        ];
        let mut stream = Vec::new();
        for message in &messages {
            stream.extend_from_slice(&message.serialize());
        }

        let (mut client, server) = tokio::io::duplex(8192);
        client.write_all(&stream).await.unwrap();
        drop(client);

        let mut reader = MessageReader::new(server);
        for expected in &messages {
            assert_eq!(&reader.read().await.unwrap(), expected);
        }
        assert_eq!(reader.read().await, Err(ReadError::Closed));
    }

    #[tokio::test]
    async fn test_read_eof_mid_message() {
        let keepalive = KeepAliveMessage {}.serialize();
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&keepalive[..10]).await.unwrap();
        drop(client);

        let mut reader = MessageReader::new(server);
        assert_eq!(reader.read().await, Err(ReadError::Closed));
    }

    #[tokio::test]
    async fn test_read_oversized_length_rejected() {
        let mut bytes = KeepAliveMessage {}.serialize();
        bytes[16] = 0x10;
        bytes[17] = 0x01; // 4097

        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&bytes).await.unwrap();
        drop(client);

        let mut reader = MessageReader::new(server);
        match reader.read().await {
            Err(ReadError::Parse(ParserError::BgpError { error, .. })) => {
                assert_eq!(
                    error,
                    BgpError::MessageHeaderError(MessageHeaderError::BadMessageLength)
                );
            }
            other => panic!("expected BadMessageLength parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parse_error_keeps_following_message() {
        // A message with a corrupt marker followed by a good KEEPALIVE; the
        // reader surfaces the parse error and still frames the next message.
        let mut bad = KeepAliveMessage {}.serialize();
        bad[0] = 0x00;
        let good = KeepAliveMessage {}.serialize();

        let (mut client, server) = tokio::io::duplex(128);
        client.write_all(&bad).await.unwrap();
        client.write_all(&good).await.unwrap();
        drop(client);

        let mut reader = MessageReader::new(server);
        assert!(matches!(reader.read().await, Err(ReadError::Parse(_))));
        assert_eq!(
            reader.read().await.unwrap(),
            BgpMessage::KeepAlive(KeepAliveMessage {})
        );
    }

    #[tokio::test]
    async fn test_writer_roundtrip() {
        let (client, server) = tokio::io::duplex(256);
        let mut writer = MessageWriter::new(client);
        let mut reader = MessageReader::new(server);

        let message = BgpMessage::Open(OpenMessage::new(65002, 45, 0x02020202));
        writer.write(&message).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), message);
    }
}
