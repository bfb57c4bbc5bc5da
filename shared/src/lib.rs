//! Wire protocol shared by the arena server and its clients.
//!
//! - [`codec`]: big-endian field encoding and the byte cursor used to parse frames
//! - [`opcodes`]: the request/response opcode table and its categories
//! - [`messages`]: typed requests and responses built on the codec

pub mod codec;
pub mod messages;
pub mod opcodes;

pub use codec::{decode_fields, encode, Field, FieldKind, Opcode, PacketReader, PacketWriter, WireError};
pub use messages::{LoginStatus, RegisterStatus, Request, Response};
