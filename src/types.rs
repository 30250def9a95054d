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

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use arrayvec::ArrayVec;
use shakmaty::Piece;

/// Maximum number of pieces in a supported table.
pub const MAX_PIECES: usize = 6;

/// List of up to [`MAX_PIECES`] pieces.
pub type Pieces = ArrayVec<Piece, MAX_PIECES>;

/// 5-valued evaluation of a position in the context of the 50-move drawing
/// rule.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(i8)]
pub enum Wdl {
    /// Unconditional loss for the side to move.
    Loss = -2,
    /// Loss that can be saved by the 50-move rule.
    BlessedLoss = -1,
    /// Unconditional draw.
    Draw = 0,
    /// Win that can be frustrated by the 50-move rule.
    CursedWin = 1,
    /// Unconditional win.
    Win = 2,
}

impl Wdl {
    /// Converts `dtz` to a `Wdl`, given that the position is exactly on the
    /// edge of the 50-move rule (i.e. the halfmove clock is zero).
    pub fn from_dtz_after_zeroing(dtz: Dtz) -> Wdl {
        match dtz.0 {
            n if n < -100 => Wdl::BlessedLoss,
            n if n < 0 => Wdl::Loss,
            0 => Wdl::Draw,
            n if n <= 100 => Wdl::Win,
            _ => Wdl::CursedWin,
        }
    }
}

impl Neg for Wdl {
    type Output = Wdl;

    fn neg(self) -> Wdl {
        match self {
            Wdl::Loss => Wdl::Win,
            Wdl::BlessedLoss => Wdl::CursedWin,
            Wdl::Draw => Wdl::Draw,
            Wdl::CursedWin => Wdl::BlessedLoss,
            Wdl::Win => Wdl::Loss,
        }
    }
}

macro_rules! from_wdl_impl {
    ($($t:ty)+) => {
        $(impl From<Wdl> for $t {
            #[inline]
            fn from(wdl: Wdl) -> $t {
                wdl as $t
            }
        })+
    }
}

from_wdl_impl! { i8 i16 i32 i64 }

/// Distance to zeroing of the half-move clock.
///
/// Can be off by one: `Dtz(-n)` can mean a loss in `n + 1` plies and `Dtz(n)`
/// can mean a win in `n + 1` plies. This is guaranteed not to happen for
/// positions exactly on the edge of the 50-move rule, so that this never
/// impacts results of practical play.
///
/// | DTZ | WDL | |
/// | --- | --- | --- |
/// | `-100 <= n <= -1` | Loss | Unconditional loss (assuming the 50-move counter is zero). Zeroing move can be forced in `-n` plies. |
/// | `n < -100` | Blessed loss | Loss, but draw under the 50-move rule. A zeroing move can be forced in `-n` plies or `-n - 100` plies (if a later phase is responsible for the blessing). |
/// | 0 | Draw | |
/// | `100 < n` | Cursed win | Win, but draw under the 50-move rule. A zeroing move can be forced in `n` or `n - 100` plies (if a later phase is responsible for the curse). |
/// | `1 <= n <= 100` | Win | Unconditional win (assuming the 50-move counter is zero). Zeroing move can be forced in `n` plies. |
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Dtz(pub i32);

impl Dtz {
    /// The DTZ reached by playing the best zeroing move in a position with
    /// the given `wdl`.
    pub fn before_zeroing(wdl: Wdl) -> Dtz {
        match wdl {
            Wdl::Loss => Dtz(-1),
            Wdl::BlessedLoss => Dtz(-101),
            Wdl::Draw => Dtz(0),
            Wdl::CursedWin => Dtz(101),
            Wdl::Win => Dtz(1),
        }
    }

    /// Increases the absolute value by `plies`, keeping the sign.
    pub fn add_plies(self, plies: i32) -> Dtz {
        Dtz(self.0.signum() * (self.0.abs() + plies))
    }

    /// The sign of the value: `1` if winning, `-1` if losing, `0` if
    /// drawn.
    pub fn signum(self) -> i32 {
        self.0.signum()
    }
}

macro_rules! from_dtz_impl {
    ($($t:ty)+) => {
        $(impl From<Dtz> for $t {
            #[inline]
            fn from(dtz: Dtz) -> $t {
                dtz.0.into()
            }
        })+
    }
}

from_dtz_impl! { i32 i64 }

macro_rules! dtz_from_impl {
    ($($t:ty)+) => {
        $(impl From<$t> for Dtz {
            #[inline]
            fn from(dtz: $t) -> Dtz {
                Dtz(i32::from(dtz))
            }
        })+
    }
}

dtz_from_impl! { u8 i8 u16 i16 i32 }

impl Neg for Dtz {
    type Output = Dtz;

    #[inline]
    fn neg(self) -> Dtz {
        Dtz(-self.0)
    }
}

impl Add for Dtz {
    type Output = Dtz;

    #[inline]
    fn add(self, other: Dtz) -> Dtz {
        Dtz(self.0 + other.0)
    }
}

impl AddAssign for Dtz {
    #[inline]
    fn add_assign(&mut self, other: Dtz) {
        self.0 += other.0;
    }
}

impl Sub for Dtz {
    type Output = Dtz;

    #[inline]
    fn sub(self, other: Dtz) -> Dtz {
        Dtz(self.0 - other.0)
    }
}

impl SubAssign for Dtz {
    #[inline]
    fn sub_assign(&mut self, other: Dtz) {
        self.0 -= other.0;
    }
}

/// Score reported by the root move filters, on a self-contained engine
/// scale: wins and losses are offset from `VALUE_MATE` by the ply horizon,
/// cursed results sit two units from the draw score, and results close to
/// the 50-move edge are interpolated in pawn units.
pub type Value = i32;

pub(crate) const VALUE_DRAW: Value = 0;
pub(crate) const VALUE_MATE: Value = 32_000;
pub(crate) const MAX_PLY: Value = 128;

/// Scaling factor for scores interpolated near the 50-move edge.
pub(crate) const PAWN_VALUE: Value = 200;

/// Indexed by `wdl + 2`.
pub(crate) const WDL_TO_VALUE: [Value; 5] = [
    -VALUE_MATE + MAX_PLY + 1,
    VALUE_DRAW - 2,
    VALUE_DRAW,
    VALUE_DRAW + 2,
    VALUE_MATE - MAX_PLY - 1,
];

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn wdls() -> impl Strategy<Value = Wdl> {
        prop_oneof![
            Just(Wdl::Loss),
            Just(Wdl::BlessedLoss),
            Just(Wdl::Draw),
            Just(Wdl::CursedWin),
            Just(Wdl::Win),
        ]
    }

    #[test]
    fn test_before_zeroing() {
        assert_eq!(Dtz::before_zeroing(Wdl::Loss), Dtz(-1));
        assert_eq!(Dtz::before_zeroing(Wdl::BlessedLoss), Dtz(-101));
        assert_eq!(Dtz::before_zeroing(Wdl::Draw), Dtz(0));
        assert_eq!(Dtz::before_zeroing(Wdl::CursedWin), Dtz(101));
        assert_eq!(Dtz::before_zeroing(Wdl::Win), Dtz(1));
    }

    #[test]
    fn test_add_plies() {
        assert_eq!(Dtz(5).add_plies(3), Dtz(8));
        assert_eq!(Dtz(-5).add_plies(3), Dtz(-8));
        assert_eq!(Dtz(101).add_plies(2), Dtz(103));
    }

    proptest! {
        #[test]
        fn test_negation_involution(wdl in wdls()) {
            prop_assert_eq!(-(-wdl), wdl);
        }

        #[test]
        fn test_wdl_has_an_equivalent_dtz(wdl in wdls()) {
            prop_assert_eq!(Wdl::from_dtz_after_zeroing(Dtz::before_zeroing(wdl)), wdl);
        }

        #[test]
        fn test_add_plies_keeps_sign(dtz in -200i32..200, plies in 0i32..100) {
            let stretched = Dtz(dtz).add_plies(plies);
            prop_assert_eq!(stretched.signum(), Dtz(dtz).signum());
        }
    }
}
