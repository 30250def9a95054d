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

use std::cmp::min;
use std::marker::PhantomData;
use std::path::Path;

use arrayvec::ArrayVec;
use bit_vec::BitVec;
use bitflags::bitflags;
use lazy_static::lazy_static;
use num_integer::binomial;
use shakmaty::{Bitboard, Color, File, Piece, Position, Rank, Role, Square};

use crate::errors::SyzygyResult;
use crate::filesystem::TableFile;
use crate::material::Material;
use crate::types::{Dtz, Pieces, Wdl, MAX_PIECES};

/// Metric stored in a table: WDL or DTZ.
#[derive(Debug, PartialEq, Eq)]
pub enum Metric {
    Wdl,
    Dtz,
}

/// Distinguishes WDL and DTZ tables at the type level.
pub trait TableKind {
    const METRIC: Metric;
    /// Magic initial bytes of a table file.
    const MAGIC: [u8; 4];
    /// File extension, e.g. `rtbw`.
    const EXTENSION: &'static str;
}

#[derive(Debug)]
pub enum WdlTag {}

impl TableKind for WdlTag {
    const METRIC: Metric = Metric::Wdl;
    const MAGIC: [u8; 4] = [0x71, 0xe8, 0x23, 0x5d];
    const EXTENSION: &'static str = "rtbw";
}

#[derive(Debug)]
pub enum DtzTag {}

impl TableKind for DtzTag {
    const METRIC: Metric = Metric::Dtz;
    const MAGIC: [u8; 4] = [0xd7, 0x66, 0x0c, 0xa5];
    const EXTENSION: &'static str = "rtbz";
}

bitflags! {
    /// Table layout flags.
    #[derive(Debug, Copy, Clone)]
    struct Layout: u8 {
        /// Two sided table for non-symmetrical material configuration.
        const SPLIT = 1;
        /// Table with pawns. Has sub-tables for each leading pawn file
        /// (a-d).
        const HAS_PAWNS = 2;
    }
}

bitflags! {
    /// Sub-table format flags.
    #[derive(Debug, Copy, Clone)]
    struct Flag: u8 {
        /// DTZ table stores black to move.
        const STM = 1;
        /// Values are remapped through an in-file byte table.
        const MAPPED = 2;
        /// DTZ table has winning positions on the edge of the 50-move rule
        /// and therefore stores exact plies rather than just full moves.
        const WIN_PLIES = 4;
        /// DTZ table has losing positions on the edge of the 50-move rule
        /// and therefore stores exact plies rather than just full moves.
        const LOSS_PLIES = 8;
        /// Table stores only a single value.
        const SINGLE_VALUE = 128;
    }
}

/// Maps squares into the a1-d1-d4 triangle.
#[rustfmt::skip]
const TRIANGLE: [u64; 64] = [
    6, 0, 1, 2, 2, 1, 0, 6,
    0, 7, 3, 4, 4, 3, 7, 0,
    1, 3, 8, 5, 5, 8, 3, 1,
    2, 4, 5, 9, 9, 5, 4, 2,
    2, 4, 5, 9, 9, 5, 4, 2,
    1, 3, 8, 5, 5, 8, 3, 1,
    0, 7, 3, 4, 4, 3, 7, 0,
    6, 0, 1, 2, 2, 1, 0, 6,
];

/// Maps the b1-h1-h7 triangle (below the a1-h8 diagonal) to `0..=27`.
#[rustfmt::skip]
const BELOW_DIAG: [u64; 64] = [
    28,  0,  1,  2,  3,  4,  5,  6,
     0, 29,  7,  8,  9, 10, 11, 12,
     1,  7, 30, 13, 14, 15, 16, 17,
     2,  8, 13, 31, 18, 19, 20, 21,
     3,  9, 14, 18, 32, 22, 23, 24,
     4, 10, 15, 19, 22, 33, 25, 26,
     5, 11, 16, 20, 23, 25, 34, 27,
     6, 12, 17, 21, 24, 26, 27, 35,
];

/// Unused entry. Never read for a legal king configuration.
const Z0: u64 = 0;

/// Encoding of all 462 configurations of two not-connected kings, the
/// first one mapped into the a1-d1-d4 triangle.
#[rustfmt::skip]
const KK_IDX: [[u64; 64]; 10] = [[
     Z0,  Z0,  Z0,   0,   1,   2,   3,   4,
     Z0,  Z0,  Z0,   5,   6,   7,   8,   9,
     10,  11,  12,  13,  14,  15,  16,  17,
     18,  19,  20,  21,  22,  23,  24,  25,
     26,  27,  28,  29,  30,  31,  32,  33,
     34,  35,  36,  37,  38,  39,  40,  41,
     42,  43,  44,  45,  46,  47,  48,  49,
     50,  51,  52,  53,  54,  55,  56,  57,
], [
     58,  Z0,  Z0,  Z0,  59,  60,  61,  62,
     63,  Z0,  Z0,  Z0,  64,  65,  66,  67,
     68,  69,  70,  71,  72,  73,  74,  75,
     76,  77,  78,  79,  80,  81,  82,  83,
     84,  85,  86,  87,  88,  89,  90,  91,
     92,  93,  94,  95,  96,  97,  98,  99,
    100, 101, 102, 103, 104, 105, 106, 107,
    108, 109, 110, 111, 112, 113, 114, 115,
], [
    116, 117,  Z0,  Z0,  Z0, 118, 119, 120,
    121, 122,  Z0,  Z0,  Z0, 123, 124, 125,
    126, 127, 128, 129, 130, 131, 132, 133,
    134, 135, 136, 137, 138, 139, 140, 141,
    142, 143, 144, 145, 146, 147, 148, 149,
    150, 151, 152, 153, 154, 155, 156, 157,
    158, 159, 160, 161, 162, 163, 164, 165,
    166, 167, 168, 169, 170, 171, 172, 173,
], [
    174,  Z0,  Z0,  Z0, 175, 176, 177, 178,
    179,  Z0,  Z0,  Z0, 180, 181, 182, 183,
    184,  Z0,  Z0,  Z0, 185, 186, 187, 188,
    189, 190, 191, 192, 193, 194, 195, 196,
    197, 198, 199, 200, 201, 202, 203, 204,
    205, 206, 207, 208, 209, 210, 211, 212,
    213, 214, 215, 216, 217, 218, 219, 220,
    221, 222, 223, 224, 225, 226, 227, 228,
], [
    229, 230,  Z0,  Z0,  Z0, 231, 232, 233,
    234, 235,  Z0,  Z0,  Z0, 236, 237, 238,
    239, 240,  Z0,  Z0,  Z0, 241, 242, 243,
    244, 245, 246, 247, 248, 249, 250, 251,
    252, 253, 254, 255, 256, 257, 258, 259,
    260, 261, 262, 263, 264, 265, 266, 267,
    268, 269, 270, 271, 272, 273, 274, 275,
    276, 277, 278, 279, 280, 281, 282, 283,
], [
    284, 285, 286, 287, 288, 289, 290, 291,
    292, 293,  Z0,  Z0,  Z0, 294, 295, 296,
    297, 298,  Z0,  Z0,  Z0, 299, 300, 301,
    302, 303,  Z0,  Z0,  Z0, 304, 305, 306,
    307, 308, 309, 310, 311, 312, 313, 314,
    315, 316, 317, 318, 319, 320, 321, 322,
    323, 324, 325, 326, 327, 328, 329, 330,
    331, 332, 333, 334, 335, 336, 337, 338,
], [
     Z0,  Z0, 339, 340, 341, 342, 343, 344,
     Z0,  Z0, 345, 346, 347, 348, 349, 350,
     Z0,  Z0, 441, 351, 352, 353, 354, 355,
     Z0,  Z0,  Z0, 442, 356, 357, 358, 359,
     Z0,  Z0,  Z0,  Z0, 443, 360, 361, 362,
     Z0,  Z0,  Z0,  Z0,  Z0, 444, 363, 364,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 445, 365,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 446,
], [
     Z0,  Z0,  Z0, 366, 367, 368, 369, 370,
     Z0,  Z0,  Z0, 371, 372, 373, 374, 375,
     Z0,  Z0,  Z0, 376, 377, 378, 379, 380,
     Z0,  Z0,  Z0, 447, 381, 382, 383, 384,
     Z0,  Z0,  Z0,  Z0, 448, 385, 386, 387,
     Z0,  Z0,  Z0,  Z0,  Z0, 449, 388, 389,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 450, 390,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 451,
], [
    452, 391, 392, 393, 394, 395, 396, 397,
     Z0,  Z0,  Z0,  Z0, 398, 399, 400, 401,
     Z0,  Z0,  Z0,  Z0, 402, 403, 404, 405,
     Z0,  Z0,  Z0,  Z0, 406, 407, 408, 409,
     Z0,  Z0,  Z0,  Z0, 453, 410, 411, 412,
     Z0,  Z0,  Z0,  Z0,  Z0, 454, 413, 414,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 455, 415,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 456,
], [
    457, 416, 417, 418, 419, 420, 421, 422,
     Z0, 458, 423, 424, 425, 426, 427, 428,
     Z0,  Z0,  Z0,  Z0,  Z0, 429, 430, 431,
     Z0,  Z0,  Z0,  Z0,  Z0, 432, 433, 434,
     Z0,  Z0,  Z0,  Z0,  Z0, 435, 436, 437,
     Z0,  Z0,  Z0,  Z0,  Z0, 459, 438, 439,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 460, 440,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 461,
]];

lazy_static! {
    static ref CONSTS: Consts = Consts::new();
}

/// Tables built once per process that drive the encoding of leading
/// pawns: an ordering of the pawn squares, the index contribution of a
/// leading pawn configuration, and the total number of configurations
/// per (pawn count, file) bucket.
struct Consts {
    map_pawns: [u64; 64],
    lead_pawn_idx: [[u64; 64]; 5],
    lead_pawns_size: [[u64; 4]; 5],
}

impl Consts {
    fn new() -> Consts {
        let mut available_squares = 48;

        let mut map_pawns = [0; 64];
        let mut lead_pawn_idx = [[0; 64]; 5];
        let mut lead_pawns_size = [[0; 4]; 5];

        for lead_pawns_cnt in 1..=4usize {
            for file in 0..4 {
                let mut idx = 0;

                for rank in 1..7 {
                    let sq = Square::from_coords(File::new(file as u32), Rank::new(rank));
                    if lead_pawns_cnt == 1 {
                        available_squares -= 1;
                        map_pawns[usize::from(sq)] = available_squares;
                        available_squares -= 1;
                        map_pawns[usize::from(sq.flip_horizontal())] = available_squares;
                    }
                    lead_pawn_idx[lead_pawns_cnt][usize::from(sq)] = idx;
                    idx += binomial(map_pawns[usize::from(sq)], lead_pawns_cnt as u64 - 1);
                }

                lead_pawns_size[lead_pawns_cnt][file] = idx;
            }
        }

        Consts {
            map_pawns,
            lead_pawn_idx,
            lead_pawns_size,
        }
    }
}

/// Checks if a square is off the a1-h8 diagonal.
fn offdiag(sq: Square) -> bool {
    u32::from(sq.file()) != u32::from(sq.rank())
}

/// Header nibble to piece. The table format encodes pieces as
/// `" PNBRQK  pnbrqk"`.
fn nibble_to_piece(p: u8) -> Option<Piece> {
    let color = Color::from_white(p & 8 == 0);
    Some(match p & !8 {
        1 => Role::Pawn.of(color),
        2 => Role::Knight.of(color),
        3 => Role::Bishop.of(color),
        4 => Role::Rook.of(color),
        5 => Role::Queen.of(color),
        6 => Role::King.of(color),
        _ => return None,
    })
}

/// Parses a piece list from the table header. Each byte holds the white
/// bucket in the low nibble and the black bucket in the high nibble.
fn parse_pieces(file: &TableFile, ptr: usize, count: usize, side: Color) -> SyzygyResult<Pieces> {
    let mut pieces = Pieces::new();
    for i in 0..min(count, MAX_PIECES) {
        let p = file.read_u8(ptr + i)?;
        pieces.push(u!(nibble_to_piece(side.fold_wb(p & 0xf, p >> 4))));
    }
    Ok(pieces)
}

/// Group pieces that will be encoded together.
fn group_pieces(pieces: &Pieces, material: &Material) -> ArrayVec<usize, MAX_PIECES> {
    let mut result = ArrayVec::new();

    // For positions without pawns the leading group is formed by 3 unique
    // pieces if available, and by the two kings otherwise.
    let first_len = if material.has_pawns() {
        0
    } else if material.unique_pieces() >= 3 {
        3
    } else {
        2
    };

    if first_len > 0 {
        result.push(first_len);
    }

    // The remaining identical pieces are grouped together.
    result.extend(pieces[first_len..].chunk_by(|a, b| a == b).map(<[_]>::len));

    result
}

/// Description of the encoding used for a piece configuration.
#[derive(Debug, Clone)]
struct GroupData {
    pieces: Pieces,
    lens: ArrayVec<usize, MAX_PIECES>,
    factors: ArrayVec<u64, { MAX_PIECES + 1 }>,
}

impl GroupData {
    fn new(pieces: Pieces, order: &[u8; 2], file: usize) -> SyzygyResult<GroupData> {
        ensure!(pieces.len() >= 2);

        let material = Material::from_iter(pieces.iter().copied());

        // Compute group lengths.
        let lens = group_pieces(&pieces, &material);

        // Compute a factor for each group.
        let pp = material.white.has_pawns() && material.black.has_pawns();
        let mut factors = ArrayVec::from([0; MAX_PIECES + 1]);
        factors.truncate(lens.len() + 1);
        let mut free_squares = 64 - lens[0] - if pp { lens[1] } else { 0 };
        let mut next = if pp { 2 } else { 1 };
        let mut idx = 1;
        let mut k = 0;

        while next < lens.len() || k == order[0] || k == order[1] {
            if k == order[0] {
                // Leading pawns or pieces.
                factors[0] = idx;

                idx *= if material.has_pawns() {
                    CONSTS.lead_pawns_size[lens[0]][file]
                } else if material.unique_pieces() >= 3 {
                    31_332
                } else {
                    462
                };
            } else if k == order[1] {
                // Remaining pawns.
                factors[1] = idx;
                idx *= binomial(48 - lens[0] as u64, lens[1] as u64);
            } else {
                // Remaining pieces.
                factors[next] = idx;
                idx *= binomial(free_squares as u64, lens[next] as u64);
                free_squares -= lens[next];
                next += 1;
            }
            k += 1;
        }

        factors[lens.len()] = idx;

        Ok(GroupData {
            pieces,
            lens,
            factors,
        })
    }
}

/// Indexes into the in-file table of remapped DTZ values.
#[derive(Debug)]
struct DtzMap {
    /// Offset of the DTZ map.
    map: usize,
    /// Offset into the map, by WDL class.
    by_wdl: [u16; 4],
}

impl DtzMap {
    fn offset(&self, wdl: Wdl) -> usize {
        let idx = match wdl {
            Wdl::Loss => 1,
            Wdl::BlessedLoss => 3,
            Wdl::Draw => 0,
            Wdl::CursedWin => 2,
            Wdl::Win => 0,
        };
        self.map + usize::from(self.by_wdl[idx])
    }
}

/// Description of the encoding and compression of one sub-table.
#[derive(Debug)]
struct PairsData {
    /// Encoding flags.
    flags: Flag,
    /// Piece configuration encoding info.
    groups: GroupData,

    /// Block size in bytes.
    block_size: u32,
    /// About every `span` values there is a sparse index entry.
    span: u32,
    /// Number of blocks in the table.
    blocks_num: u32,

    /// Offset of the symbol table.
    btree: usize,
    /// Minimum length in bits of the Huffman symbols.
    min_symlen: u8,
    /// Offset of the lowest symbols for each length.
    lowest_sym: usize,
    /// 64-bit padded lowest symbols for each length.
    base: Vec<u64>,
    /// Number of values represented by a given Huffman symbol, minus one.
    symlen: Vec<u8>,

    /// Offset of the sparse index.
    sparse_index: usize,
    /// Size of the sparse index.
    sparse_index_size: u32,

    /// Offset of the block length table.
    block_lengths: usize,
    /// Size of the block length table, padded to be bigger than
    /// `blocks_num`.
    block_length_size: u32,

    /// Start of compressed data.
    data: usize,

    /// DTZ mapping.
    dtz_map: Option<DtzMap>,
}

impl PairsData {
    fn parse<T: TableKind>(
        file: &TableFile,
        mut ptr: usize,
        groups: GroupData,
    ) -> SyzygyResult<(PairsData, usize)> {
        let flags = Flag::from_bits_truncate(file.read_u8(ptr)?);

        if flags.contains(Flag::SINGLE_VALUE) {
            let single_value = if T::METRIC == Metric::Wdl {
                file.read_u8(ptr + 1)?
            } else {
                0
            };

            return Ok((
                PairsData {
                    flags,
                    groups,
                    min_symlen: single_value,
                    base: Vec::new(),
                    block_lengths: 0,
                    block_length_size: 0,
                    block_size: 0,
                    blocks_num: 0,
                    btree: 0,
                    data: 0,
                    lowest_sym: 0,
                    span: 0,
                    sparse_index: 0,
                    sparse_index_size: 0,
                    symlen: Vec::new(),
                    dtz_map: None,
                },
                ptr + 2,
            ));
        }

        let tb_size = groups.factors[groups.lens.len()];
        let block_size = u!(1u32.checked_shl(u32::from(file.read_u8(ptr + 1)?)));
        let span = u!(1u32.checked_shl(u32::from(file.read_u8(ptr + 2)?)));
        let sparse_index_size = ((tb_size + u64::from(span) - 1) / u64::from(span)) as u32;
        let padding = file.read_u8(ptr + 3)?;
        let blocks_num = file.read_u32_le(ptr + 4)?;
        let block_length_size = u!(blocks_num.checked_add(u32::from(padding)));

        let max_symlen = file.read_u8(ptr + 8)?;
        let min_symlen = file.read_u8(ptr + 9)?;
        ensure!(min_symlen <= max_symlen);
        ensure!(max_symlen <= 32);
        let h = usize::from(max_symlen - min_symlen) + 1;

        let lowest_sym = ptr + 10;

        // Initialize base.
        let mut base = vec![0u64; h];
        for i in (0..h - 1).rev() {
            let offset = lowest_sym + i * 2;

            base[i] = u!(u!(base[i + 1]
                .checked_add(u64::from(file.read_u16_le(offset)?)))
                .checked_sub(u64::from(file.read_u16_le(offset + 2)?)))
                / 2;

            ensure!(base[i] * 2 >= base[i + 1]);
        }

        for (i, b) in base.iter_mut().enumerate() {
            *b = u!(b.checked_shl(64 - (u32::from(min_symlen) + i as u32)));
        }

        // Initialize symlen.
        ptr = lowest_sym + h * 2;
        let sym = file.read_u16_le(ptr)?;
        ptr += 2;
        let btree = ptr;
        let mut symlen = vec![0; usize::from(sym)];
        let mut visited = BitVec::from_elem(symlen.len(), false);
        for s in 0..sym {
            read_symlen(file, btree, &mut symlen, &mut visited, s, 16)?;
        }
        ptr += symlen.len() * 3 + (symlen.len() & 1);

        Ok((
            PairsData {
                flags,
                groups,

                block_size,
                span,
                blocks_num,

                btree,
                min_symlen,
                lowest_sym,
                base,
                symlen,

                sparse_index: 0, // to be initialized later
                sparse_index_size,

                block_lengths: 0, // to be initialized later
                block_length_size,

                data: 0, // to be initialized later

                dtz_map: None, // to be initialized later
            },
            ptr,
        ))
    }
}

/// Build the symlen table. The length of a symbol is the sum of the
/// lengths of its children plus one, with 0xfff marking a leaf.
fn read_symlen(
    file: &TableFile,
    btree: usize,
    symlen: &mut [u8],
    visited: &mut BitVec,
    sym: u16,
    depth: u8,
) -> SyzygyResult<()> {
    if u!(visited.get(usize::from(sym))) {
        return Ok(());
    }

    let (left, right) = file.read_lr(btree + 3 * usize::from(sym))?;

    if right == 0xfff {
        symlen[usize::from(sym)] = 0;
    } else {
        // Bounded by the number of symbols. The guard is only ever hit for
        // corrupted tables.
        let depth = u!(depth.checked_sub(1));

        read_symlen(file, btree, symlen, visited, left, depth)?;
        read_symlen(file, btree, symlen, visited, right, depth)?;

        symlen[usize::from(sym)] = u!(u!(symlen[usize::from(left)]
            .checked_add(symlen[usize::from(right)]))
            .checked_add(1));
    }

    visited.set(usize::from(sym), true);
    Ok(())
}

/// Descriptions of the sub-tables for both sides of one leading-pawn-file
/// bucket.
#[derive(Debug)]
struct FileData {
    sides: ArrayVec<PairsData, 2>,
}

/// A Syzygy table.
#[derive(Debug)]
pub struct Table<T: TableKind> {
    kind: PhantomData<T>,

    file: TableFile,

    material: Material,
    num_unique_pieces: u8,

    files: ArrayVec<FileData, 4>,
}

impl<T: TableKind> Table<T> {
    /// Opens a table, parses the header and the headers of the sub-tables,
    /// and prepares the metadata required for decompression.
    pub fn open<P: AsRef<Path>>(path: P, material: &Material) -> SyzygyResult<Table<T>> {
        ensure!(material.count() <= MAX_PIECES);

        let file = TableFile::open(path, &T::MAGIC)?;

        // Read layout flags.
        let layout = Layout::from_bits_truncate(file.read_u8(4)?);
        let has_pawns = layout.contains(Layout::HAS_PAWNS);
        let split = layout.contains(Layout::SPLIT);

        // Check consistency of layout and material key.
        ensure!(has_pawns == material.has_pawns());
        ensure!(split != material.is_symmetric());

        // Read group data.
        let pp = material.white.has_pawns() && material.black.has_pawns();
        let num_files = if has_pawns { 4 } else { 1 };
        let num_sides = if T::METRIC == Metric::Wdl && !material.is_symmetric() {
            2
        } else {
            1
        };

        let mut groups: ArrayVec<ArrayVec<GroupData, 2>, 4> = ArrayVec::new();
        let mut ptr = 5;

        for f in 0..num_files {
            let order = [
                [
                    file.read_u8(ptr)? & 0xf,
                    if pp { file.read_u8(ptr + 1)? & 0xf } else { 0xf },
                ],
                [
                    file.read_u8(ptr)? >> 4,
                    if pp { file.read_u8(ptr + 1)? >> 4 } else { 0xf },
                ],
            ];

            ptr += 1 + usize::from(pp);

            let mut sides = ArrayVec::new();

            for side in [Color::White, Color::Black].into_iter().take(num_sides) {
                let pieces = parse_pieces(&file, ptr, material.count(), side)?;
                let key = Material::from_iter(pieces.iter().copied());
                ensure!(key == *material || key.flipped() == *material);

                let group = GroupData::new(pieces, &order[side.fold_wb(0, 1)], f)?;
                sides.push(group);
            }

            ptr += material.count();

            groups.push(sides);
        }

        ptr += ptr & 1;

        // The material of the table from the white bucket's point of view,
        // the reference for symmetry handling in encode().
        let table_material = Material::from_iter(groups[0][0].pieces.iter().copied());

        // Parse the compressed stream headers.
        let mut files: ArrayVec<FileData, 4> = ArrayVec::new();

        for f in 0..num_files {
            let mut sides = ArrayVec::new();

            for s in 0..num_sides {
                let (pairs, next_ptr) = PairsData::parse::<T>(&file, ptr, groups[f][s].clone())?;
                sides.push(pairs);
                ptr = next_ptr;
            }

            files.push(FileData { sides });
        }

        // Read the DTZ value maps.
        if T::METRIC == Metric::Dtz {
            let map = ptr;

            for side in files.iter_mut().filter_map(|f| f.sides.first_mut()) {
                if side.flags.contains(Flag::MAPPED) {
                    let mut by_wdl = [0; 4];
                    for idx in &mut by_wdl {
                        *idx = u!(u16::try_from(ptr - map + 1).ok());
                        ptr += usize::from(file.read_u8(ptr)?) + 1;
                    }
                    side.dtz_map = Some(DtzMap { map, by_wdl });
                }
            }

            ptr += ptr & 1;
        }

        // Assign the index table, size table and data offsets of every
        // sub-table in file order.
        for f in &mut files {
            for side in &mut f.sides {
                side.sparse_index = ptr;
                ptr += side.sparse_index_size as usize * 6;
            }
        }

        for f in &mut files {
            for side in &mut f.sides {
                side.block_lengths = ptr;
                ptr += side.block_length_size as usize * 2;
            }
        }

        for f in &mut files {
            for side in &mut f.sides {
                ptr = (ptr + 0x3f) & !0x3f; // 64 byte alignment
                side.data = ptr;
                ptr = u!(ptr.checked_add(side.blocks_num as usize * side.block_size as usize));
            }
        }

        ensure!(ptr <= file.len());

        Ok(Table {
            kind: PhantomData,
            file,
            num_unique_pieces: material.unique_pieces(),
            material: table_material,
            files,
        })
    }

    /// Retrieves the value stored for `idx` by decompressing Huffman
    /// coded symbols from the block that covers it.
    fn decompress_pairs(&self, d: &PairsData, idx: u64) -> SyzygyResult<u8> {
        if d.flags.contains(Flag::SINGLE_VALUE) {
            return Ok(d.min_symlen);
        }

        // Use the sparse index to jump close to the correct block.
        let k = (idx / u64::from(d.span)) as usize;
        let mut block = u64::from(self.file.read_u32_le(d.sparse_index + 6 * k)?);
        let mut litidx = i64::from(self.file.read_u16_le(d.sparse_index + 6 * k + 4)?)
            + idx as i64 % i64::from(d.span)
            - i64::from(d.span) / 2;

        // Now walk forwards/backwards to the block that actually contains
        // the value.
        while litidx < 0 {
            block = u!(block.checked_sub(1));
            litidx += i64::from(self.file.read_u16_le(d.block_lengths + block as usize * 2)?) + 1;
        }

        loop {
            let block_length =
                i64::from(self.file.read_u16_le(d.block_lengths + block as usize * 2)?);
            if litidx <= block_length {
                break;
            }
            litidx -= block_length + 1;
            block += 1;
        }

        ensure!(block < u64::from(d.blocks_num));

        let mut ptr = d.data + block as usize * d.block_size as usize;

        // Find the Huffman symbol that encodes the value for idx.
        let mut buf = self.file.read_u64_be(ptr)?;
        ptr += 8;
        let mut buf_size = 64i32;

        let mut sym;

        loop {
            let mut len = 0;

            while buf < *u!(d.base.get(len)) {
                len += 1;
            }

            sym = ((buf - d.base[len]) >> (64 - len - usize::from(d.min_symlen))) as u16;
            sym = u!(sym.checked_add(self.file.read_u16_le(d.lowest_sym + 2 * len)?));

            if litidx < i64::from(*u!(d.symlen.get(usize::from(sym)))) + 1 {
                break;
            }

            litidx -= i64::from(d.symlen[usize::from(sym)]) + 1;
            len += usize::from(d.min_symlen);
            buf <<= len;
            buf_size -= len as i32;

            // Refill the buffer.
            if buf_size <= 32 {
                buf_size += 32;
                buf |= u64::from(self.file.read_u32_be(ptr)?) << (64 - buf_size);
                ptr += 4;
            }
        }

        // Expand the pair dictionary down to the leaf that covers litidx.
        while *u!(d.symlen.get(usize::from(sym))) != 0 {
            let (left, right) = self.file.read_lr(d.btree + 3 * usize::from(sym))?;

            if litidx < i64::from(*u!(d.symlen.get(usize::from(left)))) + 1 {
                sym = left;
            } else {
                litidx -= i64::from(d.symlen[usize::from(left)]) + 1;
                sym = right;
            }
        }

        self.file.read_u8(d.btree + 3 * usize::from(sym))
    }

    /// Given a position, determines the sub-table and the unique (modulo
    /// symmetries) index into it. Returns `None` if the position can only
    /// be probed from the other side, which the caller resolves with a
    /// 1-ply search.
    fn encode<S: Position>(&self, pos: &S) -> SyzygyResult<Option<(&PairsData, u64)>> {
        let key = Material::from_board(pos.board());
        let material = &self.material;
        ensure!(key == *material || key == material.flipped());

        let symmetric_btm = material.is_symmetric() && pos.turn().is_black();
        let black_stronger = key != *material;
        let flip = symmetric_btm || black_stronger;
        let bside = pos.turn().is_black() ^ flip;

        let mut squares: ArrayVec<Square, MAX_PIECES> = ArrayVec::new();
        let mut used = Bitboard::EMPTY;

        // For pawns there are sub-tables for each file (a, b, c, d) the
        // leading pawn can be placed on.
        let file = if material.has_pawns() {
            let reference_pawn = self.files[0].sides[0].groups.pieces[0];
            ensure!(reference_pawn.role == Role::Pawn);
            let color = if flip {
                !reference_pawn.color
            } else {
                reference_pawn.color
            };

            let lead_pawns = pos.board().pawns() & pos.board().by_color(color);
            used |= lead_pawns;
            squares.extend(
                lead_pawns
                    .into_iter()
                    .map(|sq| if flip { sq.flip_vertical() } else { sq }),
            );

            // Ensure squares[0] is the maximum with regard to map_pawns.
            for i in 1..squares.len() {
                if CONSTS.map_pawns[usize::from(squares[0])]
                    < CONSTS.map_pawns[usize::from(squares[i])]
                {
                    squares.swap(0, i);
                }
            }

            if squares[0].file() >= File::E {
                u32::from(squares[0].flip_horizontal().file()) as usize
            } else {
                u32::from(squares[0].file()) as usize
            }
        } else {
            0
        };

        // WDL tables have sub-tables for each side to move.
        let side = &self.files[file].sides[if bside {
            self.files[file].sides.len() - 1
        } else {
            0
        }];

        // DTZ tables store only one side to move.
        if T::METRIC == Metric::Dtz
            && side.flags.contains(Flag::STM) != bside
            && (!material.is_symmetric() || material.has_pawns())
        {
            return Ok(None);
        }

        // The sub-table has been determined. Add the remaining pieces in
        // the canonical order expected by the table.
        let lead_pawns_count = squares.len();

        for piece in side.groups.pieces.iter().skip(lead_pawns_count) {
            let color = if flip { !piece.color } else { piece.color };
            let square = u!((pos.board().by_piece(piece.role.of(color)) & !used).first());
            squares.push(if flip { square.flip_vertical() } else { square });
            used |= Bitboard::from(square);
        }

        ensure!(squares.len() >= 2);

        // Now compute the index according to the piece positions.
        if squares[0].file() >= File::E {
            for square in &mut squares {
                *square = square.flip_horizontal();
            }
        }

        let mut idx = if material.has_pawns() {
            let mut idx = CONSTS.lead_pawn_idx[lead_pawns_count][usize::from(squares[0])];

            squares[1..lead_pawns_count]
                .sort_unstable_by_key(|sq| CONSTS.map_pawns[usize::from(*sq)]);

            for (i, &sq) in squares.iter().enumerate().take(lead_pawns_count).skip(1) {
                idx += binomial(CONSTS.map_pawns[usize::from(sq)], i as u64);
            }

            idx
        } else {
            if squares[0].rank() >= Rank::Fifth {
                for square in &mut squares {
                    *square = square.flip_vertical();
                }
            }

            for i in 0..side.groups.lens[0] {
                if !offdiag(squares[i]) {
                    continue;
                }

                if u32::from(squares[i].rank()) > u32::from(squares[i].file()) {
                    for square in &mut squares[i..] {
                        *square = square.flip_diagonal();
                    }
                }

                break;
            }

            if self.num_unique_pieces > 2 {
                let adjust1 = u64::from(squares[1] > squares[0]);
                let adjust2 = u64::from(squares[2] > squares[0]) + u64::from(squares[2] > squares[1]);

                // Leading group of three unique pieces, the first one
                // confined to the a1-d1-d4 triangle.
                if offdiag(squares[0]) {
                    TRIANGLE[usize::from(squares[0])] * 63 * 62
                        + (u64::from(squares[1]) - adjust1) * 62
                        + (u64::from(squares[2]) - adjust2)
                } else if offdiag(squares[1]) {
                    6 * 63 * 62
                        + u64::from(u32::from(squares[0].rank())) * 28 * 62
                        + BELOW_DIAG[usize::from(squares[1])] * 62
                        + (u64::from(squares[2]) - adjust2)
                } else if offdiag(squares[2]) {
                    6 * 63 * 62
                        + 4 * 28 * 62
                        + u64::from(u32::from(squares[0].rank())) * 7 * 28
                        + (u64::from(u32::from(squares[1].rank())) - adjust1) * 28
                        + BELOW_DIAG[usize::from(squares[2])]
                } else {
                    6 * 63 * 62
                        + 4 * 28 * 62
                        + 4 * 7 * 28
                        + u64::from(u32::from(squares[0].rank())) * 7 * 6
                        + (u64::from(u32::from(squares[1].rank())) - adjust1) * 6
                        + (u64::from(u32::from(squares[2].rank())) - adjust2)
                }
            } else {
                // The leading group is the two kings.
                KK_IDX[TRIANGLE[usize::from(squares[0])] as usize][usize::from(squares[1])]
            }
        };

        idx *= side.groups.factors[0];

        // Encode the remaining groups by combinatorial ranking.
        let mut remaining_pawns = material.white.has_pawns() && material.black.has_pawns();
        let mut next = 1;
        let mut group_sq = side.groups.lens[0];

        for lens in side.groups.lens.iter().copied().skip(1) {
            let (prev_squares, group_squares) = squares.split_at_mut(group_sq);
            let group_squares = &mut group_squares[..lens];
            group_squares.sort_unstable();

            let mut n = 0;

            for (i, &group_square) in group_squares.iter().enumerate() {
                let adjust = prev_squares.iter().filter(|sq| group_square > **sq).count() as u64;
                n += binomial(
                    u64::from(group_square) - adjust - if remaining_pawns { 8 } else { 0 },
                    i as u64 + 1,
                );
            }

            remaining_pawns = false;
            idx += n * side.groups.factors[next];
            group_sq += side.groups.lens[next];
            next += 1;
        }

        Ok(Some((side, idx)))
    }
}

/// A WDL table.
pub type WdlTable = Table<WdlTag>;

impl WdlTable {
    pub fn probe_wdl_table<S: Position>(&self, pos: &S) -> SyzygyResult<Wdl> {
        let (side, idx) = u!(self.encode(pos)?);

        match self.decompress_pairs(side, idx)? {
            0 => Ok(Wdl::Loss),
            1 => Ok(Wdl::BlessedLoss),
            2 => Ok(Wdl::Draw),
            3 => Ok(Wdl::CursedWin),
            4 => Ok(Wdl::Win),
            _ => throw!(),
        }
    }
}

/// A DTZ table.
pub type DtzTable = Table<DtzTag>;

impl DtzTable {
    /// Returns `None` if the table stores only the other side to move.
    pub fn probe_dtz_table<S: Position>(&self, pos: &S, wdl: Wdl) -> SyzygyResult<Option<Dtz>> {
        let (side, idx) = match self.encode(pos)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let decompressed = self.decompress_pairs(side, idx)?;

        let res = i32::from(match side.dtz_map {
            Some(ref map) => self.file.read_u8(map.offset(wdl) + usize::from(decompressed))?,
            None => decompressed,
        });

        // Stored in full moves unless the flags indicate the relevant
        // 50-move edge cases are present.
        let stores_moves = match wdl {
            Wdl::Win => !side.flags.contains(Flag::WIN_PLIES),
            Wdl::Loss => !side.flags.contains(Flag::LOSS_PLIES),
            Wdl::CursedWin | Wdl::BlessedLoss => true,
            Wdl::Draw => false,
        };

        Ok(Some(Dtz(if stores_moves { res * 2 } else { res })))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;

    use shakmaty::fen::Fen;
    use shakmaty::{CastlingMode, Chess};

    use super::*;

    // Complete single-value reference tables. KNvK is drawn everywhere,
    // so the WDL table stores one value and no compressed blocks.
    pub const KNVK_RTBW: &[u8] = &[
        0x71, 0xE8, 0x23, 0x5D, 0x31, 0x00, 0xEE, 0x66, 0x22, 0x00, 0x80, 0x02, 0x80, 0x02, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0xB9, 0xEC, 0xCB, 0xFF, 0x19, 0xC6, 0x77, 0x15, 0x8E, 0x92, 0x8B,
        0x1B, 0x64, 0x12, 0x48, 0xB7,
    ];

    pub const KNVKN_RTBZ: &[u8] = &[
        0xD7, 0x66, 0x0C, 0xA5, 0x40, 0x01, 0x0E, 0x0A, 0x06, 0x02, 0x80, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x2D, 0xA6, 0x2B, 0xDA, 0x60, 0xBF, 0xB9, 0x2C, 0xBD, 0x46, 0x72,
        0xDB, 0x2C, 0xD6, 0xB6, 0xC5,
    ];

    fn fen(fen: &str) -> Chess {
        fen.parse::<Fen>()
            .expect("valid fen")
            .into_position(CastlingMode::Standard)
            .expect("legal position")
    }

    fn write_table(name: &str, bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(name);
        fs::write(&path, bytes).expect("write table");
        (dir, path)
    }

    #[test]
    fn test_open_knvk() {
        let (_dir, path) = write_table("KNvK.rtbw", KNVK_RTBW);
        let material: Material = "KNvK".parse().expect("valid");
        let table = WdlTable::open(&path, &material).expect("open");

        let pos = fen("4k3/8/8/8/8/8/8/N3K3 w - - 0 1");
        assert_eq!(table.probe_wdl_table(&pos).expect("probe"), Wdl::Draw);

        let pos = fen("4k3/8/8/8/8/8/8/N3K3 b - - 0 1");
        assert_eq!(table.probe_wdl_table(&pos).expect("probe"), Wdl::Draw);
    }

    #[test]
    fn test_open_with_wrong_magic() {
        let (_dir, path) = write_table("KNvK.rtbz", KNVK_RTBW);
        let material: Material = "KNvK".parse().expect("valid");
        assert!(matches!(
            DtzTable::open(&path, &material),
            Err(crate::errors::SyzygyError::Magic)
        ));
    }

    #[test]
    fn test_open_with_wrong_material() {
        let (_dir, path) = write_table("KQvK.rtbw", KNVK_RTBW);
        let material: Material = "KQvK".parse().expect("valid");
        assert!(WdlTable::open(&path, &material).is_err());
    }

    #[test]
    fn test_open_knvkn_dtz() {
        let (_dir, path) = write_table("KNvKN.rtbz", KNVKN_RTBZ);
        let material: Material = "KNvKN".parse().expect("valid");
        let table = DtzTable::open(&path, &material).expect("open");

        let pos = fen("6nk/8/8/8/8/8/8/KN6 w - - 0 1");
        assert_eq!(
            table.probe_dtz_table(&pos, Wdl::Draw).expect("probe"),
            Some(Dtz(0))
        );
    }

    #[test]
    fn test_encode_mirrored_positions() {
        let (_dir, path) = write_table("KNvKN.rtbz", KNVKN_RTBZ);
        let material: Material = "KNvKN".parse().expect("valid");
        let table = DtzTable::open(&path, &material).expect("open");

        // The second position is the first one with colors swapped and
        // the board flipped vertically. Canonicalization maps both to the
        // same index.
        let pos = fen("6nk/8/8/8/8/8/8/KN6 w - - 0 1");
        let mirrored = fen("kn6/8/8/8/8/8/8/6NK b - - 0 1");

        let (_, idx) = table.encode(&pos).expect("encode").expect("one sided");
        let (_, mirrored_idx) = table
            .encode(&mirrored)
            .expect("encode")
            .expect("one sided");

        assert_eq!(idx, mirrored_idx);
    }

    #[test]
    fn test_truncated_table_is_corrupt() {
        let (_dir, path) = write_table("KNvK.rtbw", &KNVK_RTBW[..8]);
        let material: Material = "KNvK".parse().expect("valid");
        assert!(WdlTable::open(&path, &material).is_err());
    }
}
