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

use crate::errors::MessageHeaderError;

use std::{convert::TryFrom, fmt};

/// The operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl OpCode {
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for OpCode {
    type Error = MessageHeaderError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(OpCode::Reply),
            2001 => Ok(OpCode::Update),
            2002 => Ok(OpCode::Insert),
            2004 => Ok(OpCode::Query),
            2005 => Ok(OpCode::GetMore),
            2006 => Ok(OpCode::Delete),
            2007 => Ok(OpCode::KillCursors),
            other => Err(MessageHeaderError::UnknownOpCode(other)),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_known_codes() {
        for opcode in &[
            OpCode::Reply,
            OpCode::Update,
            OpCode::Insert,
            OpCode::Query,
            OpCode::GetMore,
            OpCode::Delete,
            OpCode::KillCursors,
        ] {
            assert_eq!(OpCode::try_from(opcode.as_i32()).unwrap(), *opcode);
        }
    }

    #[test]
    fn rejects_unknown_codes() {
        assert!(matches!(
            OpCode::try_from(2003),
            Err(MessageHeaderError::UnknownOpCode(2003))
        ));
    }
}
