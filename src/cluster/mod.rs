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

pub mod cluster;
pub use self::cluster::*;

pub mod pinger;
pub use self::pinger::*;

pub mod read_preference;
pub use self::read_preference::*;

pub mod selector;
pub use self::selector::*;

pub mod server;
pub use self::server::*;

pub mod version;
pub use self::version::*;
