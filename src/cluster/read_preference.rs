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

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreferenceMode {
    /// Only the writable primary.
    Primary,
    /// The primary when available, otherwise any readable secondary.
    PrimaryPreferred,
    /// Only readable secondaries.
    Secondary,
    /// A readable secondary when available, otherwise the primary.
    SecondaryPreferred,
    /// Whichever matching server answers fastest, primary or not.
    Nearest,
}

/// Where a request may be serviced, with optional tag constraints.
///
/// A server matches the tag constraint when every required key is present in
/// its tag set with an equal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    pub tags: Option<HashMap<String, String>>,
}

impl ReadPreference {
    pub fn primary() -> Self {
        Self::with_mode(ReadPreferenceMode::Primary)
    }

    pub fn primary_preferred() -> Self {
        Self::with_mode(ReadPreferenceMode::PrimaryPreferred)
    }

    pub fn secondary() -> Self {
        Self::with_mode(ReadPreferenceMode::Secondary)
    }

    pub fn secondary_preferred() -> Self {
        Self::with_mode(ReadPreferenceMode::SecondaryPreferred)
    }

    pub fn nearest() -> Self {
        Self::with_mode(ReadPreferenceMode::Nearest)
    }

    fn with_mode(mode: ReadPreferenceMode) -> Self {
        ReadPreference { mode, tags: None }
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Returns `true` if this preference ever reads from a non-writable server.
    #[inline]
    pub fn allows_secondaries(&self) -> bool {
        self.mode != ReadPreferenceMode::Primary
    }

    /// Returns `true` if the given tag set satisfies the constraint.
    pub fn matches_tags(&self, server_tags: &HashMap<String, String>) -> bool {
        match &self.tags {
            None => true,
            Some(required) => required
                .iter()
                .all(|(key, value)| server_tags.get(key) == Some(value)),
        }
    }
}

impl Default for ReadPreference {
    fn default() -> Self {
        ReadPreference::primary()
    }
}
