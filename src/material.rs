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

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use shakmaty::{Board, Color, Piece, Role};

/// Roles in table name order.
const ROLES: [Role; 6] = [
    Role::King,
    Role::Queen,
    Role::Rook,
    Role::Bishop,
    Role::Knight,
    Role::Pawn,
];

/// Error when parsing a material key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParseMaterialError;

impl fmt::Display for ParseMaterialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid material key")
    }
}

impl std::error::Error for ParseMaterialError {}

/// The material configuration of one side.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct MaterialSide {
    counts: [u8; 6],
}

impl MaterialSide {
    pub fn new() -> MaterialSide {
        MaterialSide::default()
    }

    pub fn by_role(&self, role: Role) -> u8 {
        self.counts[role as usize - 1]
    }

    pub fn by_role_mut(&mut self, role: Role) -> &mut u8 {
        &mut self.counts[role as usize - 1]
    }

    pub fn count(&self) -> usize {
        self.counts.iter().map(|c| usize::from(*c)).sum()
    }

    pub fn has_pawns(&self) -> bool {
        self.by_role(Role::Pawn) > 0
    }

    /// Number of roles of which this side has exactly one piece.
    pub fn unique_roles(&self) -> u8 {
        self.counts.iter().filter(|c| **c == 1).count() as u8
    }
}

impl fmt::Display for MaterialSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for role in ROLES {
            for _ in 0..self.by_role(role) {
                write!(f, "{}", role.upper_char())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MaterialSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Ord for MaterialSide {
    fn cmp(&self, other: &MaterialSide) -> Ordering {
        self.count()
            .cmp(&other.count())
            .then_with(|| ROLES.map(|r| self.by_role(r)).cmp(&ROLES.map(|r| other.by_role(r))))
    }
}

impl PartialOrd for MaterialSide {
    fn partial_cmp(&self, other: &MaterialSide) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Extend<Role> for MaterialSide {
    fn extend<T: IntoIterator<Item = Role>>(&mut self, iter: T) {
        for role in iter {
            *self.by_role_mut(role) += 1;
        }
    }
}

impl FromIterator<Role> for MaterialSide {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> MaterialSide {
        let mut side = MaterialSide::new();
        side.extend(iter);
        side
    }
}

impl FromStr for MaterialSide {
    type Err = ParseMaterialError;

    fn from_str(s: &str) -> Result<MaterialSide, ParseMaterialError> {
        s.chars()
            .map(|ch| Role::from_char(ch.to_ascii_lowercase()).ok_or(ParseMaterialError))
            .collect()
    }
}

/// The material configuration of both sides, used as a table key and as
/// the stem of table file names, e.g. `KQPvKRP`.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct Material {
    pub white: MaterialSide,
    pub black: MaterialSide,
}

impl Material {
    pub fn new() -> Material {
        Material::default()
    }

    pub fn from_board(board: &Board) -> Material {
        let mut material = Material::new();
        for color in [Color::White, Color::Black] {
            for role in ROLES {
                *material.by_color_mut(color).by_role_mut(role) =
                    board.by_piece(role.of(color)).count() as u8;
            }
        }
        material
    }

    pub fn by_color(&self, color: Color) -> &MaterialSide {
        color.fold_wb(&self.white, &self.black)
    }

    fn by_color_mut(&mut self, color: Color) -> &mut MaterialSide {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    pub fn count(&self) -> usize {
        self.white.count() + self.black.count()
    }

    pub fn has_pawns(&self) -> bool {
        self.white.has_pawns() || self.black.has_pawns()
    }

    pub fn is_symmetric(&self) -> bool {
        self.white == self.black
    }

    /// Total number of roles of which either side has exactly one piece.
    pub fn unique_pieces(&self) -> u8 {
        self.white.unique_roles() + self.black.unique_roles()
    }

    /// The same material with the colors swapped.
    pub fn flipped(&self) -> Material {
        Material {
            white: self.black.clone(),
            black: self.white.clone(),
        }
    }

    /// Puts the stronger side first, the form used in table file names.
    pub fn normalized(&self) -> Material {
        if self.white >= self.black {
            self.clone()
        } else {
            self.flipped()
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.white, self.black)
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Extend<Piece> for Material {
    fn extend<T: IntoIterator<Item = Piece>>(&mut self, iter: T) {
        for piece in iter {
            *self.by_color_mut(piece.color).by_role_mut(piece.role) += 1;
        }
    }
}

impl FromIterator<Piece> for Material {
    fn from_iter<T: IntoIterator<Item = Piece>>(iter: T) -> Material {
        let mut material = Material::new();
        material.extend(iter);
        material
    }
}

impl FromStr for Material {
    type Err = ParseMaterialError;

    fn from_str(s: &str) -> Result<Material, ParseMaterialError> {
        let (white, black) = s.split_once('v').ok_or(ParseMaterialError)?;

        let material = Material {
            white: white.parse()?,
            black: black.parse()?,
        };

        if material.white.by_role(Role::King) != 1 || material.black.by_role(Role::King) != 1 {
            return Err(ParseMaterialError);
        }

        Ok(material)
    }
}
