//! Binary wire codec
//!
//! Every frame is a big-endian `i16` opcode followed by the fields that opcode
//! defines, in a fixed order and with no envelope length. The reader on one end
//! must consume exactly what the writer on the other end produced, so field
//! layouts and opcodes change together.
//!
//! Strings follow the `writeUTF` convention: an `i16` byte length, then UTF-8.

use thiserror::Error;

/// Numeric message identifier shared by requests and responses.
pub type Opcode = i16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ends before the field does. More bytes may still arrive.
    #[error("incomplete frame: {needed} more byte(s) needed")]
    Incomplete { needed: usize },
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("string of {0} bytes does not fit a 16-bit length")]
    StringTooLong(usize),
}

/// A single typed value on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Short(i16),
    Int(i32),
    /// Raw block; its length comes from the surrounding layout.
    Bytes(Vec<u8>),
    Str(String),
}

/// Field shapes used to drive a generic decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Short,
    Int,
    Bytes(usize),
    Str,
}

/// Builds one outbound frame.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new(opcode: Opcode) -> Self {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&opcode.to_be_bytes());
        Self { buf }
    }

    pub fn add_short(&mut self, value: i16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn add_int(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn add_str(&mut self, value: &str) -> Result<&mut Self, WireError> {
        let len = i16::try_from(value.len()).map_err(|_| WireError::StringTooLong(value.len()))?;
        self.add_short(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(self)
    }

    pub fn add_field(&mut self, field: &Field) -> Result<&mut Self, WireError> {
        match field {
            Field::Short(v) => Ok(self.add_short(*v)),
            Field::Int(v) => Ok(self.add_int(*v)),
            Field::Bytes(b) => Ok(self.add_bytes(b)),
            Field::Str(s) => self.add_str(s),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over received bytes.
///
/// Reads never consume on failure, so a caller that sees
/// [`WireError::Incomplete`] can retry from the same frame start once more
/// input has been buffered.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Incomplete {
                needed: len - self.remaining(),
            });
        }
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_short(&mut self) -> Result<i16, WireError> {
        let bytes = self.take(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_int(&mut self) -> Result<i32, WireError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError> {
        Ok(self.take(len)?.to_vec())
    }

    /// Reads an `i16` length followed by that many bytes.
    pub fn read_sized_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let start = self.pos;
        let len = self.read_short()?;
        if len < 0 {
            return Err(WireError::Malformed(format!("negative block length {}", len)));
        }
        let block = self.read_bytes(len as usize);
        if block.is_err() {
            self.pos = start;
        }
        block
    }

    pub fn read_str(&mut self) -> Result<String, WireError> {
        let bytes = self.read_sized_bytes()?;
        String::from_utf8(bytes).map_err(|e| WireError::Malformed(format!("invalid utf-8: {}", e)))
    }

    pub fn read_field(&mut self, kind: FieldKind) -> Result<Field, WireError> {
        Ok(match kind {
            FieldKind::Short => Field::Short(self.read_short()?),
            FieldKind::Int => Field::Int(self.read_int()?),
            FieldKind::Bytes(len) => Field::Bytes(self.read_bytes(len)?),
            FieldKind::Str => Field::Str(self.read_str()?),
        })
    }
}

/// Encodes an opcode and its fields into one frame.
pub fn encode(opcode: Opcode, fields: &[Field]) -> Result<Vec<u8>, WireError> {
    let mut writer = PacketWriter::new(opcode);
    for field in fields {
        writer.add_field(field)?;
    }
    Ok(writer.into_bytes())
}

/// Decodes a frame whose layout is given by `kinds`.
pub fn decode_fields(data: &[u8], kinds: &[FieldKind]) -> Result<(Opcode, Vec<Field>), WireError> {
    let mut reader = PacketReader::new(data);
    let opcode = reader.read_short()?;
    let fields = kinds
        .iter()
        .map(|kind| reader.read_field(*kind))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((opcode, fields))
}
