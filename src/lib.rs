// This file is part of the rtbprobe library.
// Copyright (C) 2017-2018 Niklas Fiekas <niklas.fiekas@backscattering.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

//! Probe Syzygy endgame tablebases.
//!
//! Syzygy tables allow optimal play with respect to the 50-move rule for
//! positions with up to 6 pieces. [WDL](`Wdl`) tables hold the outcome of
//! a position and [DTZ](`Dtz`) tables the distance to the next capture or
//! pawn move under optimal play.
//!
//! # Example
//!
//! ```no_run
//! use shakmaty::{fen::Fen, CastlingMode, Chess};
//! use rtbprobe::{Tablebase, Wdl};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tables = Tablebase::new();
//! tables.init("/opt/syzygy/wdl345:/opt/syzygy/dtz345");
//!
//! let pos: Chess = "8/8/8/8/B7/N7/K2k4/8 b - - 0 1"
//!     .parse::<Fen>()?
//!     .into_position(CastlingMode::Standard)?;
//!
//! let wdl = tables.probe_wdl(&pos)?;
//! assert_eq!(wdl, Wdl::Loss);
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations)]

#[macro_use]
mod errors;

mod filesystem;
mod lazy;
mod material;
mod table;
mod tablebase;
mod types;

pub use crate::errors::{SyzygyError, SyzygyResult};
pub use crate::material::{Material, MaterialSide, ParseMaterialError};
pub use crate::tablebase::Tablebase;
pub use crate::types::{Dtz, Value, Wdl, MAX_PIECES};
