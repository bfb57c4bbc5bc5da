//! Typed request and response messages.
//!
//! `Request::encode` is what a client writes; the server parses the same
//! layouts through its dispatch table. `Response::encode` is what the server
//! writes and `Response::decode` is the client side of it.

use crate::codec::{Opcode, PacketReader, PacketWriter, WireError};
use crate::opcodes::*;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Heartbeat,
    PushUpdate { payload: Vec<u8> },
    KeepAlive,
    Register { username: String, password: String },
    Login { username: String, password: String },
    StartGame,
    JoinGame,
    EndGame,
    Pickup { item_id: i16 },
    Hit { damage: i16 },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Heartbeat => CMSG_HEARTBEAT,
            Request::PushUpdate { .. } => CMSG_PUSH_UPDATE,
            Request::KeepAlive => CMSG_KEEPALIVE,
            Request::Register { .. } => CMSG_REGISTER,
            Request::Login { .. } => CMSG_LOGIN,
            Request::StartGame => CMSG_START_GAME,
            Request::JoinGame => CMSG_JOIN_GAME,
            Request::EndGame => CMSG_END_GAME,
            Request::Pickup { .. } => CMSG_PICKUP,
            Request::Hit { .. } => CMSG_HIT,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut packet = PacketWriter::new(self.opcode());
        match self {
            Request::PushUpdate { payload } => {
                add_sized_bytes(&mut packet, payload)?;
            }
            Request::Register { username, password } | Request::Login { username, password } => {
                packet.add_str(username)?.add_str(password)?;
            }
            Request::Pickup { item_id } => {
                packet.add_short(*item_id);
            }
            Request::Hit { damage } => {
                packet.add_short(*damage);
            }
            Request::Heartbeat
            | Request::KeepAlive
            | Request::StartGame
            | Request::JoinGame
            | Request::EndGame => {}
        }
        Ok(packet.into_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    Created = 0,
    NameTaken = 1,
    InvalidInput = 2,
    StorageFailure = 3,
}

impl RegisterStatus {
    fn from_code(code: i16) -> Result<Self, WireError> {
        match code {
            0 => Ok(RegisterStatus::Created),
            1 => Ok(RegisterStatus::NameTaken),
            2 => Ok(RegisterStatus::InvalidInput),
            3 => Ok(RegisterStatus::StorageFailure),
            other => Err(WireError::Malformed(format!("unknown register status {}", other))),
        }
    }
}

/// Reasons a login is refused. Success is `Response::LoginAccepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    InvalidCredentials = 1,
    AlreadyOnline = 2,
    AlreadyAuthenticated = 3,
}

impl LoginStatus {
    fn from_code(code: i16) -> Result<Self, WireError> {
        match code {
            1 => Ok(LoginStatus::InvalidCredentials),
            2 => Ok(LoginStatus::AlreadyOnline),
            3 => Ok(LoginStatus::AlreadyAuthenticated),
            other => Err(WireError::Malformed(format!("unknown login status {}", other))),
        }
    }
}

/// Outbound message. Immutable once built so one value can sit in many
/// update queues at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Heartbeat {
        sequence: i16,
        updates: Vec<Arc<Response>>,
    },
    PushUpdate {
        user_id: i32,
        payload: Vec<u8>,
    },
    Register {
        status: RegisterStatus,
    },
    LoginAccepted {
        user_id: i32,
        username: String,
    },
    LoginRejected {
        status: LoginStatus,
    },
    /// `None` when the side-channel port pool is exhausted.
    StartGame {
        port: Option<u16>,
    },
    JoinGame {
        players: i16,
    },
    EndGame,
    PlayerJoined {
        user_id: i32,
        username: String,
    },
    Pickup {
        item_id: i16,
    },
    Hit {
        damage: i16,
    },
}

impl Response {
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Heartbeat { .. } => SMSG_HEARTBEAT,
            Response::PushUpdate { .. } => SMSG_PUSH_UPDATE,
            Response::Register { .. } => SMSG_REGISTER,
            Response::LoginAccepted { .. } | Response::LoginRejected { .. } => SMSG_LOGIN,
            Response::StartGame { .. } => SMSG_START_GAME,
            Response::JoinGame { .. } => SMSG_JOIN_GAME,
            Response::EndGame => SMSG_END_GAME,
            Response::PlayerJoined { .. } => SMSG_PLAYER_JOINED,
            Response::Pickup { .. } => SMSG_PICKUP,
            Response::Hit { .. } => SMSG_HIT,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut packet = PacketWriter::new(self.opcode());
        match self {
            Response::Heartbeat { sequence, updates } => {
                let count = i16::try_from(updates.len()).map_err(|_| {
                    WireError::Malformed(format!("{} updates exceed one heartbeat", updates.len()))
                })?;
                packet.add_short(*sequence).add_short(count);
                for update in updates {
                    packet.add_bytes(&update.encode()?);
                }
            }
            Response::PushUpdate { user_id, payload } => {
                packet.add_int(*user_id);
                add_sized_bytes(&mut packet, payload)?;
            }
            Response::Register { status } => {
                packet.add_short(*status as i16);
            }
            Response::LoginAccepted { user_id, username } => {
                packet.add_short(0).add_int(*user_id).add_str(username)?;
            }
            Response::LoginRejected { status } => {
                packet.add_short(*status as i16);
            }
            Response::StartGame { port } => match port {
                Some(port) => {
                    packet.add_short(0).add_int(i32::from(*port));
                }
                None => {
                    packet.add_short(1).add_int(-1);
                }
            },
            Response::JoinGame { players } => {
                packet.add_short(*players);
            }
            Response::EndGame => {
                packet.add_short(0);
            }
            Response::PlayerJoined { user_id, username } => {
                packet.add_int(*user_id).add_str(username)?;
            }
            Response::Pickup { item_id } => {
                packet.add_short(*item_id);
            }
            Response::Hit { damage } => {
                packet.add_short(*damage);
            }
        }
        Ok(packet.into_bytes())
    }

    /// Reads one response frame, including any updates nested in a heartbeat.
    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Response, WireError> {
        let opcode = reader.read_short()?;
        let response = match opcode {
            SMSG_HEARTBEAT => {
                let sequence = reader.read_short()?;
                let count = reader.read_short()?;
                if count < 0 {
                    return Err(WireError::Malformed(format!("negative update count {}", count)));
                }
                let mut updates = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    updates.push(Arc::new(Response::decode(reader)?));
                }
                Response::Heartbeat { sequence, updates }
            }
            SMSG_PUSH_UPDATE => Response::PushUpdate {
                user_id: reader.read_int()?,
                payload: reader.read_sized_bytes()?,
            },
            SMSG_REGISTER => Response::Register {
                status: RegisterStatus::from_code(reader.read_short()?)?,
            },
            SMSG_LOGIN => match reader.read_short()? {
                0 => Response::LoginAccepted {
                    user_id: reader.read_int()?,
                    username: reader.read_str()?,
                },
                code => Response::LoginRejected {
                    status: LoginStatus::from_code(code)?,
                },
            },
            SMSG_START_GAME => {
                let status = reader.read_short()?;
                let port = reader.read_int()?;
                match (status, u16::try_from(port)) {
                    (0, Ok(port)) => Response::StartGame { port: Some(port) },
                    _ => Response::StartGame { port: None },
                }
            }
            SMSG_JOIN_GAME => Response::JoinGame {
                players: reader.read_short()?,
            },
            SMSG_END_GAME => {
                reader.read_short()?;
                Response::EndGame
            }
            SMSG_PLAYER_JOINED => Response::PlayerJoined {
                user_id: reader.read_int()?,
                username: reader.read_str()?,
            },
            SMSG_PICKUP => Response::Pickup {
                item_id: reader.read_short()?,
            },
            SMSG_HIT => Response::Hit {
                damage: reader.read_short()?,
            },
            other => {
                return Err(WireError::Malformed(format!("unknown response opcode {}", other)));
            }
        };
        Ok(response)
    }
}

fn add_sized_bytes(packet: &mut PacketWriter, payload: &[u8]) -> Result<(), WireError> {
    let len = i16::try_from(payload.len()).map_err(|_| WireError::StringTooLong(payload.len()))?;
    packet.add_short(len).add_bytes(payload);
    Ok(())
}
