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

use std::{fmt, str::FromStr};

/// A dotted numeric server version, e.g. `4.0.2`.
///
/// Non-numeric suffixes (`-rc0` and the like) are ignored past the digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion(Vec<u64>);

impl ServerVersion {
    pub fn new(parts: Vec<u64>) -> Self {
        ServerVersion(parts)
    }

    pub fn parts(&self) -> &[u64] {
        &self.0
    }
}

impl FromStr for ServerVersion {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = Vec::new();
        for piece in value.split('.') {
            let digits: String = piece.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                break;
            }
            parts.push(digits.parse().map_err(|_| ())?);
        }
        if parts.is_empty() {
            return Err(());
        }
        Ok(ServerVersion(parts))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "{}", rendered.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_versions() {
        assert_eq!("4.0.2".parse(), Ok(ServerVersion::new(vec![4, 0, 2])));
        assert_eq!("2.6".parse(), Ok(ServerVersion::new(vec![2, 6])));
    }

    #[test]
    fn ignores_prerelease_suffixes() {
        assert_eq!("3.5.1-rc0".parse(), Ok(ServerVersion::new(vec![3, 5, 1])));
    }

    #[test]
    fn rejects_non_numeric_input() {
        assert!(ServerVersion::from_str("latest").is_err());
    }

    #[test]
    fn orders_numerically() {
        let old: ServerVersion = "2.6.11".parse().unwrap();
        let new: ServerVersion = "2.11.0".parse().unwrap();
        assert!(old < new);
    }
}
