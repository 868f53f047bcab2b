//! Stream framer: turns a fragmented byte stream into complete messages.

use std::mem;

use crate::message::{Message, MessageDefinition};
use crate::tlv::{self, HEADER_LENGTH};
use crate::ProtocolError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AwaitingBody {
        definition: &'static MessageDefinition,
        length: usize,
    },
}

/// Per-connection framing state machine.
///
/// Input may arrive one byte at a time, in exactly one chunk per message, or
/// with several messages coalesced in one chunk; the output is the same.
/// A header error is fatal for the connection: the caller must drop it.
pub struct Framer {
    state: State,
    header: [u8; HEADER_LENGTH],
    header_filled: usize,
    body: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            state: State::AwaitingHeader,
            header: [0u8; HEADER_LENGTH],
            header_filled: 0,
            body: Vec::new(),
        }
    }

    /// Consume `data` and return every message it completed.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        let mut messages = Vec::new();

        loop {
            match self.state {
                State::AwaitingHeader => {
                    if data.is_empty() {
                        break;
                    }
                    let take = (HEADER_LENGTH - self.header_filled).min(data.len());
                    self.header[self.header_filled..self.header_filled + take]
                        .copy_from_slice(&data[..take]);
                    self.header_filled += take;
                    data = &data[take..];

                    if self.header_filled < HEADER_LENGTH {
                        break;
                    }
                    self.header_filled = 0;

                    let (definition, length) = tlv::parse_header(&self.header).map_err(|e| {
                        tracing::debug!(error = %e, header = ?self.header, "rejecting message header");
                        e
                    })?;
                    if length == 0 {
                        messages.push(Message {
                            message_type: definition.message_type,
                            body: Vec::new(),
                        });
                        continue;
                    }

                    self.body = Vec::with_capacity(length);
                    self.state = State::AwaitingBody { definition, length };
                }
                State::AwaitingBody { definition, length } => {
                    if data.is_empty() {
                        break;
                    }
                    let take = (length - self.body.len()).min(data.len());
                    self.body.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if self.body.len() == length {
                        messages.push(Message {
                            message_type: definition.message_type,
                            body: mem::take(&mut self.body),
                        });
                        self.state = State::AwaitingHeader;
                    }
                }
            }
        }

        Ok(messages)
    }

    /// Whether a partially received message is buffered.
    pub fn is_mid_message(&self) -> bool {
        self.header_filled > 0 || matches!(self.state, State::AwaitingBody { .. })
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
