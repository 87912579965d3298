// Copyright (C) 2019-2021 the docnet Developers
// This file is part of the docnet library.

// The docnet library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The docnet library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the docnet library. If not, see <https://www.gnu.org/licenses/>.

use crate::{errors::MessageHeaderError, message::OpCode};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{convert::TryFrom, io::Cursor};

/// The fixed preamble of every frame: total length (header included), the
/// sender-assigned request id, the request id this frame answers (zero for
/// client-originated messages), and the operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: u32,
    pub request_id: i32,
    pub response_to_id: i32,
    pub opcode: OpCode,
}

impl MessageHeader {
    pub fn new(length: u32, request_id: i32, response_to_id: i32, opcode: OpCode) -> Self {
        MessageHeader {
            length,
            request_id,
            response_to_id,
            opcode,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut wtr = Vec::with_capacity(crate::HEADER_SIZE);
        wtr.write_u32::<LittleEndian>(self.length).expect("writing to a vec");
        wtr.write_i32::<LittleEndian>(self.request_id).expect("writing to a vec");
        wtr.write_i32::<LittleEndian>(self.response_to_id)
            .expect("writing to a vec");
        wtr.write_i32::<LittleEndian>(self.opcode.as_i32())
            .expect("writing to a vec");
        wtr
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, MessageHeaderError> {
        if bytes.len() != crate::HEADER_SIZE {
            return Err(MessageHeaderError::InvalidLength(bytes.len()));
        }

        let mut rdr = Cursor::new(bytes);
        let length = rdr.read_u32::<LittleEndian>().expect("reading a sized slice");
        let request_id = rdr.read_i32::<LittleEndian>().expect("reading a sized slice");
        let response_to_id = rdr.read_i32::<LittleEndian>().expect("reading a sized slice");
        let opcode = OpCode::try_from(rdr.read_i32::<LittleEndian>().expect("reading a sized slice"))?;

        if (length as usize) < crate::HEADER_SIZE {
            return Err(MessageHeaderError::TooShort(length as usize));
        }
        if length as usize > crate::MAX_MESSAGE_SIZE {
            return Err(MessageHeaderError::TooBig(length as usize, crate::MAX_MESSAGE_SIZE));
        }

        Ok(MessageHeader {
            length,
            request_id,
            response_to_id,
            opcode,
        })
    }

    /// The number of body bytes following the header.
    #[inline]
    pub fn body_length(&self) -> usize {
        self.length as usize - crate::HEADER_SIZE
    }
}
