//! Opcode dispatch table
//!
//! Maps an exact opcode to the factory that parses that request's fields and
//! produces a fresh [`Request`] for one frame. The table is filled once at
//! startup by direct reference, so every layout the server accepts is visible
//! here next to its opcode.

use log::warn;
use shared::opcodes::*;
use shared::{Opcode, PacketReader, Request, WireError};
use std::collections::HashMap;
use std::fmt;

/// Parses the fields that follow an opcode.
pub type HandlerFactory = fn(&mut PacketReader<'_>) -> Result<Request, WireError>;

/// Result of decoding one frame header.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Request(Request),
    /// No handler is registered. Only the opcode has been consumed.
    Unknown(Opcode),
}

#[derive(Default, Clone)]
pub struct DispatchTable {
    factories: HashMap<Opcode, HandlerFactory>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut opcodes: Vec<&Opcode> = self.factories.keys().collect();
        opcodes.sort();
        f.debug_struct("DispatchTable").field("opcodes", &opcodes).finish()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Table with every request the server understands.
    pub fn standard() -> Self {
        let mut table = Self::new();

        // General
        table.register(CMSG_HEARTBEAT, |_| Ok(Request::Heartbeat));
        table.register(CMSG_PUSH_UPDATE, |r| {
            Ok(Request::PushUpdate {
                payload: r.read_sized_bytes()?,
            })
        });
        table.register(CMSG_KEEPALIVE, |_| Ok(Request::KeepAlive));

        // Authentication
        table.register(CMSG_REGISTER, |r| {
            Ok(Request::Register {
                username: r.read_str()?,
                password: r.read_str()?,
            })
        });
        table.register(CMSG_LOGIN, |r| {
            Ok(Request::Login {
                username: r.read_str()?,
                password: r.read_str()?,
            })
        });

        // Lobby
        table.register(CMSG_START_GAME, |_| Ok(Request::StartGame));
        table.register(CMSG_JOIN_GAME, |_| Ok(Request::JoinGame));
        table.register(CMSG_END_GAME, |_| Ok(Request::EndGame));

        // Actions
        table.register(CMSG_PICKUP, |r| {
            Ok(Request::Pickup {
                item_id: r.read_short()?,
            })
        });
        table.register(CMSG_HIT, |r| {
            Ok(Request::Hit {
                damage: r.read_short()?,
            })
        });

        table
    }

    pub fn register(&mut self, opcode: Opcode, factory: HandlerFactory) {
        if self.factories.insert(opcode, factory).is_some() {
            warn!("Handler for opcode {} replaced", opcode);
        }
    }

    pub fn lookup(&self, opcode: Opcode) -> Option<HandlerFactory> {
        self.factories.get(&opcode).copied()
    }

    pub fn contains(&self, opcode: Opcode) -> bool {
        self.factories.contains_key(&opcode)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Reads an opcode and, if it is known, the request fields behind it.
    ///
    /// On error the reader position is meaningless; callers restart from the
    /// frame start once more bytes arrive.
    pub fn parse_frame(&self, reader: &mut PacketReader<'_>) -> Result<Frame, WireError> {
        let opcode = reader.read_short()?;
        match self.lookup(opcode) {
            Some(factory) => factory(reader).map(Frame::Request),
            None => Ok(Frame::Unknown(opcode)),
        }
    }
}
