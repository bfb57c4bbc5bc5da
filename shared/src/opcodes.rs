//! Opcode table
//!
//! Requests are numbered 1xx and responses 2xx. The tens digit names the
//! functional category; it only groups handlers and never takes part in
//! dispatch.

use crate::codec::Opcode;

// General: x0x
pub const CMSG_HEARTBEAT: Opcode = 101;
pub const SMSG_HEARTBEAT: Opcode = 201;
pub const CMSG_PUSH_UPDATE: Opcode = 102;
pub const SMSG_PUSH_UPDATE: Opcode = 202;
pub const CMSG_KEEPALIVE: Opcode = 103;

// Authentication: x1x
pub const CMSG_REGISTER: Opcode = 111;
pub const SMSG_REGISTER: Opcode = 211;
pub const CMSG_LOGIN: Opcode = 112;
pub const SMSG_LOGIN: Opcode = 212;

// Lobby: x2x
pub const CMSG_START_GAME: Opcode = 121;
pub const SMSG_START_GAME: Opcode = 221;
pub const CMSG_JOIN_GAME: Opcode = 122;
pub const SMSG_JOIN_GAME: Opcode = 222;
pub const CMSG_END_GAME: Opcode = 123;
pub const SMSG_END_GAME: Opcode = 223;
pub const SMSG_PLAYER_JOINED: Opcode = 224;

// Actions: x4x pickups, x5x hits
pub const CMSG_PICKUP: Opcode = 140;
pub const SMSG_PICKUP: Opcode = 240;
pub const CMSG_HIT: Opcode = 150;
pub const SMSG_HIT: Opcode = 250;

/// Protocol version reported by binaries at startup.
pub const PROTOCOL_VERSION: &str = "1.00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    General,
    Authentication,
    Lobby,
    Action,
    Other(u8),
}

impl Category {
    pub fn of(opcode: Opcode) -> Self {
        match (opcode.unsigned_abs() / 10) % 10 {
            0 => Category::General,
            1 => Category::Authentication,
            2 => Category::Lobby,
            4 | 5 => Category::Action,
            digit => Category::Other(digit as u8),
        }
    }
}
