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

use std::cmp::{max, min};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fxhash::FxHashMap;
use log::{info, warn};
use shakmaty::{MoveList, Position, Role};

use crate::errors::{SyzygyError, SyzygyResult};
use crate::filesystem;
use crate::lazy::Lazy;
use crate::material::Material;
use crate::table::{DtzTable, DtzTag, TableKind, WdlTable, WdlTag};
use crate::types::{Dtz, Value, Wdl, MAX_PIECES, PAWN_VALUE, WDL_TO_VALUE};

/// Maximum number of DTZ tables kept open at the same time.
const DTZ_ENTRIES: usize = 64;

/// Additional probe information from a brief alpha-beta search.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ProbeState {
    /// Normal probe.
    Normal,
    /// Best move is zeroing.
    ZeroingBestMove,
}

fn rotate_role(role: Role) -> Role {
    match role {
        Role::Pawn => Role::Knight,
        Role::Knight => Role::Bishop,
        Role::Bishop => Role::Rook,
        Role::Rook => Role::Queen,
        Role::Queen => Role::King,
        Role::King => Role::Pawn,
    }
}

struct RoleRange {
    from: Role,
    to: Role,
}

impl RoleRange {
    fn excl(from: Role, to: Role) -> RoleRange {
        RoleRange { from, to }
    }

    fn incl(from: Role, to: Role) -> RoleRange {
        RoleRange {
            from,
            to: rotate_role(to),
        }
    }
}

impl Iterator for RoleRange {
    type Item = Role;

    fn next(&mut self) -> Option<Role> {
        if self.from != self.to {
            let from = self.from;
            self.from = rotate_role(from);
            Some(from)
        } else {
            None
        }
    }
}

/// A registered WDL table, opened on first probe.
#[derive(Debug)]
struct WdlEntry {
    path: PathBuf,
    table: Lazy<WdlTable>,
}

/// A DTZ table in the most-recently-used list. `table` is `None` if a
/// previous attempt to open it failed; the entry is kept so that later
/// probes short-circuit.
#[derive(Debug)]
struct DtzEntry {
    material: Material,
    table: Option<DtzTable>,
}

/// Most-recently-used list of open DTZ tables, bounded by `DTZ_ENTRIES`.
#[derive(Debug, Default)]
struct DtzCache {
    entries: VecDeque<Arc<DtzEntry>>,
}

impl DtzCache {
    /// Promotes the entry for `material` to the front.
    fn touch(&mut self, material: &Material) -> Option<Arc<DtzEntry>> {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.material == *material)?;
        let entry = self.entries.remove(idx)?;
        self.entries.push_front(Arc::clone(&entry));
        Some(entry)
    }

    /// Inserts a new entry at the front, evicting the least recently used
    /// entry if the list is full. The caller may keep using the returned
    /// handle even if the entry is evicted by a concurrent probe.
    fn insert(&mut self, material: Material, table: Option<DtzTable>) -> Arc<DtzEntry> {
        let entry = Arc::new(DtzEntry { material, table });
        self.entries.push_front(Arc::clone(&entry));
        self.entries.truncate(DTZ_ENTRIES);
        entry
    }
}

/// A collection of Syzygy tables, opened lazily while probing.
#[derive(Debug)]
pub struct Tablebase {
    paths: Vec<PathBuf>,
    max_cardinality: usize,
    wdl: FxHashMap<Material, WdlEntry>,
    dtz: Mutex<DtzCache>,
}

impl Default for Tablebase {
    fn default() -> Tablebase {
        Tablebase::new()
    }
}

impl Tablebase {
    /// Creates an empty collection of tables. Probing is disabled until
    /// [`Tablebase::init`] finds tables on a search path.
    pub fn new() -> Tablebase {
        Tablebase {
            paths: Vec::new(),
            max_cardinality: 0,
            wdl: FxHashMap::default(),
            dtz: Mutex::new(DtzCache::default()),
        }
    }

    /// Clears the registry and scans `paths` for tables.
    ///
    /// `paths` is a list of directories separated by `:` on Unix-like
    /// systems and by `;` on Windows. An empty list or the literal
    /// `<empty>` disables probing.
    ///
    /// Registers every material configuration of up to 6 pieces for which
    /// a WDL file exists in one of the directories. Files are not opened
    /// or validated until the first probe that needs them.
    pub fn init(&mut self, paths: &str) {
        self.wdl.clear();
        self.dtz.lock().expect("dtz cache lock").entries.clear();
        self.max_cardinality = 0;

        self.paths = if paths.is_empty() || paths == "<empty>" {
            Vec::new()
        } else {
            filesystem::split_paths(paths)
        };

        if self.paths.is_empty() {
            return;
        }

        self.register_all();

        info!("found {} tablebases", self.wdl.len());
    }

    /// Maximum number of pieces for which a table was found, or 0 if the
    /// registry is empty.
    pub fn max_cardinality(&self) -> usize {
        self.max_cardinality
    }

    /// Registers all material configurations with up to 6 pieces and one
    /// king on each side.
    fn register_all(&mut self) {
        use Role::*;

        for a in RoleRange::excl(Pawn, King) {
            self.register(&[King, a], &[King]);

            for b in RoleRange::incl(Pawn, a) {
                self.register(&[King, a, b], &[King]);
                self.register(&[King, a], &[King, b]);

                for c in RoleRange::excl(Pawn, King) {
                    self.register(&[King, a, b], &[King, c]);
                }

                for c in RoleRange::incl(Pawn, b) {
                    self.register(&[King, a, b, c], &[King]);

                    for d in RoleRange::incl(Pawn, c) {
                        self.register(&[King, a, b, c, d], &[King]);
                    }

                    for d in RoleRange::excl(Pawn, King) {
                        self.register(&[King, a, b, c], &[King, d]);
                    }
                }

                for c in RoleRange::incl(Pawn, a) {
                    for d in RoleRange::incl(Pawn, if a == c { b } else { c }) {
                        self.register(&[King, a, b], &[King, c, d]);
                    }
                }
            }
        }
    }

    fn register(&mut self, white: &[Role], black: &[Role]) {
        let material = Material {
            white: white.iter().copied().collect(),
            black: black.iter().copied().collect(),
        }
        .normalized();

        let name = format!("{}.{}", material, WdlTag::EXTENSION);

        if let Some(path) = filesystem::resolve(&self.paths, &name) {
            self.max_cardinality = max(self.max_cardinality, material.count());
            self.wdl
                .entry(material)
                .or_insert_with(|| WdlEntry {
                    path,
                    table: Lazy::new(),
                });
        }
    }

    /// Probes tables for the [`Wdl`] value of a position.
    ///
    /// The result is from the point of view of the side to move,
    /// indicating if the position is winning, lost or drawn with respect
    /// to the 50-move rule.
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions. The result is
    /// meaningless if an error is returned.
    pub fn probe_wdl<S: Position + Clone>(&self, pos: &S) -> SyzygyResult<Wdl> {
        if pos.board().occupied().count() > MAX_PIECES {
            return Err(SyzygyError::TooManyPieces);
        }
        if pos.castles().any() {
            return Err(SyzygyError::Castling);
        }

        // Probe.
        let (mut v, _) = self.probe_ab(pos, Wdl::Loss, Wdl::Win)?;

        // If en passant is not possible we are done.
        let ep_moves = pos.en_passant_moves();
        if ep_moves.is_empty() {
            return Ok(v);
        }

        // Now look at all legal en passant captures.
        let mut v1 = Wdl::Loss;
        for m in ep_moves {
            let mut after = pos.clone();
            after.play_unchecked(&m);

            let (v0, _) = self.probe_ab(&after, Wdl::Loss, Wdl::Win)?;
            v1 = max(-v0, v1);
        }

        if v1 >= v {
            v = v1;
        } else if v == Wdl::Draw {
            // If there is not at least one legal non-en-passant move we
            // are forced to play the losing en passant capture.
            let moves = pos.legal_moves();
            if moves.iter().all(|m| m.is_en_passant()) {
                v = v1;
            }
        }

        Ok(v)
    }

    /// Probes tables for the [`Dtz`] value of a position.
    ///
    /// Min-maxing the DTZ of the available moves guarantees achieving the
    /// optimal outcome under the 50-move rule.
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions. The result is
    /// meaningless if an error is returned.
    pub fn probe_dtz<S: Position + Clone>(&self, pos: &S) -> SyzygyResult<Dtz> {
        if pos.board().occupied().count() > MAX_PIECES {
            return Err(SyzygyError::TooManyPieces);
        }
        if pos.castles().any() {
            return Err(SyzygyError::Castling);
        }

        // Probe, treating the position as if en passant were not
        // possible.
        let mut v = self.probe_dtz_no_ep(pos)?;

        let ep_moves = pos.en_passant_moves();
        if ep_moves.is_empty() {
            return Ok(v);
        }

        // Check all en passant captures.
        let mut wdl = Wdl::Loss;
        for m in ep_moves {
            let mut after = pos.clone();
            after.play_unchecked(&m);

            let (v0, _) = self.probe_ab(&after, Wdl::Loss, Wdl::Win)?;
            wdl = max(-v0, wdl);
        }

        // Combine the en passant result with the regular result,
        // preferring the move that actually exists in the legal move set.
        let v1 = Dtz::before_zeroing(wdl);

        if v < Dtz(-100) {
            if v1 >= Dtz(0) {
                v = v1;
            }
        } else if v < Dtz(0) {
            if v1 >= Dtz(0) || v1 < Dtz(-100) {
                v = v1;
            }
        } else if v > Dtz(100) {
            if v1 > Dtz(0) {
                v = v1;
            }
        } else if v > Dtz(0) {
            if v1 == Dtz(1) {
                v = v1;
            }
        } else if v1 >= Dtz(0) {
            v = v1;
        } else {
            // If there is not at least one legal non-en-passant move we
            // are forced to play the losing en passant capture.
            let moves = pos.legal_moves();
            if moves.iter().all(|m| m.is_en_passant()) {
                v = v1;
            }
        }

        Ok(v)
    }

    /// Searches all non-en-passant captures (including underpromotions)
    /// before accepting the table value for the position itself, because
    /// tables may store arbitrary lower values for positions with winning
    /// captures.
    fn probe_ab<S: Position + Clone>(
        &self,
        pos: &S,
        mut alpha: Wdl,
        beta: Wdl,
    ) -> SyzygyResult<(Wdl, ProbeState)> {
        let mut captures = pos.capture_moves();
        captures.retain(|m| !m.is_en_passant());

        for m in captures {
            let mut after = pos.clone();
            after.play_unchecked(&m);

            let (v0, _) = self.probe_ab(&after, -beta, -alpha)?;
            let v = -v0;

            if v > alpha {
                if v >= beta {
                    return Ok((v, ProbeState::ZeroingBestMove));
                }
                alpha = v;
            }
        }

        let v = self.probe_wdl_table(pos)?;

        if alpha >= v {
            Ok((
                alpha,
                if alpha > Wdl::Draw {
                    ProbeState::ZeroingBestMove
                } else {
                    ProbeState::Normal
                },
            ))
        } else {
            Ok((v, ProbeState::Normal))
        }
    }

    fn probe_wdl_table<S: Position>(&self, pos: &S) -> SyzygyResult<Wdl> {
        // KvK is a draw and has no table.
        if pos.board().kings() == pos.board().occupied() {
            return Ok(Wdl::Draw);
        }

        let key = Material::from_board(pos.board());

        let (material, entry) = match self
            .wdl
            .get_key_value(&key)
            .or_else(|| self.wdl.get_key_value(&key.flipped()))
        {
            Some(found) => found,
            None => {
                return Err(SyzygyError::MissingTable {
                    material: key.normalized(),
                })
            }
        };

        let mut defect = None;

        let table = entry.table.get_or_init(|| {
            match WdlTable::open(&entry.path, material) {
                Ok(table) => Some(table),
                Err(error) => {
                    warn!("failed to open {}: {}", entry.path.display(), error);
                    defect = Some(error);
                    None
                }
            }
        });

        match table {
            Some(table) => table.probe_wdl_table(pos),
            None => Err(defect.unwrap_or(SyzygyError::MissingTable {
                material: key.normalized(),
            })),
        }
    }

    fn probe_dtz_no_ep<S: Position + Clone>(&self, pos: &S) -> SyzygyResult<Dtz> {
        let (wdl, state) = self.probe_ab(pos, Wdl::Loss, Wdl::Win)?;

        if wdl == Wdl::Draw {
            return Ok(Dtz(0));
        }

        if state == ProbeState::ZeroingBestMove {
            return Ok(Dtz::before_zeroing(wdl));
        }

        if wdl > Wdl::Draw {
            // The position is winning, so a pawn move that keeps the win
            // is an immediate zeroing move.
            let mut moves = pos.legal_moves();
            moves.retain(|m| m.role() == Role::Pawn && !m.is_capture());

            for m in moves {
                let mut after = pos.clone();
                after.play_unchecked(&m);

                let v = -self.probe_wdl(&after)?;

                if v == wdl {
                    return Ok(Dtz::before_zeroing(v));
                }
            }
        }

        // The best move is not zeroing, so the DTZ table holds the value,
        // one ply of descent removed.
        if let Some(Dtz(plies)) = self.probe_dtz_table(pos, wdl)? {
            return Ok(Dtz::before_zeroing(wdl).add_plies(plies));
        }

        // The table stores only the opposite side to move. Reconstruct
        // the value from the WDL tables with a 1-ply search.
        if wdl > Wdl::Draw {
            let mut best = None;

            let mut moves = pos.legal_moves();
            moves.retain(|m| !m.is_zeroing());

            for m in moves {
                let mut after = pos.clone();
                after.play_unchecked(&m);

                let v = -self.probe_dtz(&after)?;

                if v > Dtz(0) && best.map_or(true, |best| v + Dtz(1) < best) {
                    best = Some(if v == Dtz(1) && after.is_checkmate() {
                        Dtz(1)
                    } else {
                        v + Dtz(1)
                    });
                }
            }

            Ok(u!(best))
        } else {
            let mut best = Dtz(-1);

            for m in pos.legal_moves() {
                let zeroing = m.is_zeroing();

                let mut after = pos.clone();
                after.play_unchecked(&m);

                let v = if zeroing {
                    if wdl == Wdl::Loss {
                        Dtz(-1)
                    } else {
                        let (v, _) = self.probe_ab(&after, Wdl::CursedWin, Wdl::Win)?;
                        Dtz(if v == Wdl::Win { 0 } else { -101 })
                    }
                } else {
                    -self.probe_dtz(&after)? - Dtz(1)
                };

                best = min(v, best);
            }

            Ok(best)
        }
    }

    fn probe_dtz_table<S: Position>(&self, pos: &S, wdl: Wdl) -> SyzygyResult<Option<Dtz>> {
        let key = Material::from_board(pos.board());
        let material = key.normalized();

        let mut defect = None;

        let entry = {
            let mut cache = self.dtz.lock().expect("dtz cache lock");

            match cache.touch(&material) {
                Some(entry) => entry,
                None => {
                    let name = format!("{}.{}", material, DtzTag::EXTENSION);

                    let table = match filesystem::resolve(&self.paths, &name) {
                        Some(path) => match DtzTable::open(&path, &material) {
                            Ok(table) => Some(table),
                            Err(error) => {
                                warn!("failed to open {}: {}", path.display(), error);
                                defect = Some(error);
                                None
                            }
                        },
                        None => None,
                    };

                    cache.insert(material.clone(), table)
                }
            }
        };

        match entry.table {
            Some(ref table) => table.probe_dtz_table(pos, wdl),
            None => Err(defect.unwrap_or(SyzygyError::MissingTable { material })),
        }
    }

    /// Uses the DTZ tables to rank and filter the root moves, keeping
    /// only those that preserve the win or draw. If the position is lost,
    /// keeps the moves that maximise the distance to zeroing.
    ///
    /// `has_repeated` tells whether the position has been repeated since
    /// the last zeroing move. The caller knows this from its search
    /// stack; with no repetition there is more room under the 50-move
    /// rule.
    ///
    /// Returns the score of the root position. If any probe fails, no
    /// moves are filtered out.
    pub fn root_probe<S: Position + Clone>(
        &self,
        pos: &S,
        moves: &mut MoveList,
        has_repeated: bool,
    ) -> SyzygyResult<Value> {
        let dtz = self.probe_dtz(pos)?;
        let cnt50 = pos.halfmoves() as i32;

        // Rank every root move by the DTZ of the position after it.
        let mut ranks = Vec::with_capacity(moves.len());

        for m in moves.iter() {
            let mut after = pos.clone();
            after.play_unchecked(&m);

            let v = if dtz > Dtz(0) && after.is_checkmate() {
                // Winning, and the move mates immediately.
                Dtz(1)
            } else if after.halfmoves() != 0 {
                match -self.probe_dtz(&after)? {
                    Dtz(n) if n > 0 => Dtz(n + 1),
                    Dtz(n) if n < 0 => Dtz(n - 1),
                    _ => Dtz(0),
                }
            } else {
                Dtz::before_zeroing(-self.probe_wdl(&after)?)
            };

            ranks.push(v);
        }

        // Use the 50-move counter to determine if the root position is
        // won, lost or drawn.
        let wdl: i32 = if dtz > Dtz(0) {
            if dtz.0 + cnt50 <= 100 {
                2
            } else {
                1
            }
        } else if dtz < Dtz(0) {
            if -dtz.0 + cnt50 <= 100 {
                -2
            } else {
                -1
            }
        } else {
            0
        };

        // Determine the score to report, showing how close a cursed
        // result is to the 50-move edge.
        let mut score = WDL_TO_VALUE[(wdl + 2) as usize];
        if wdl == 1 && dtz.0 <= 100 {
            score = (200 - dtz.0 - cnt50) * PAWN_VALUE / 200;
        } else if wdl == -1 && dtz.0 >= -100 {
            score = -((200 + dtz.0 - cnt50) * PAWN_VALUE / 200);
        }

        if dtz > Dtz(0) {
            // Winning, or drawn by the 50-move rule.
            let best = ranks
                .iter()
                .copied()
                .filter(|v| *v > Dtz(0))
                .min()
                .unwrap_or(Dtz(0));

            // If the current phase has not seen repetitions, try all
            // moves that stay safely within the 50-move budget.
            let max_dtz = if !has_repeated && best.0 + cnt50 <= 99 {
                Dtz(99 - cnt50)
            } else {
                best
            };

            let mut i = 0;
            moves.retain(|_| {
                let keep = ranks[i] > Dtz(0) && ranks[i] <= max_dtz;
                i += 1;
                keep
            });
        } else if dtz < Dtz(0) {
            // Losing, or drawn by the 50-move rule.
            let best = ranks.iter().copied().min().unwrap_or(Dtz(0));

            // Try all moves, unless we approach or have a 50-move rule
            // draw.
            if -best.0 * 2 + cnt50 < 100 {
                return Ok(score);
            }

            let mut i = 0;
            moves.retain(|_| {
                let keep = ranks[i] == best;
                i += 1;
                keep
            });
        } else {
            // Drawing. Keep the moves that preserve the draw.
            let mut i = 0;
            moves.retain(|_| {
                let keep = ranks[i] == Dtz(0);
                i += 1;
                keep
            });
        }

        Ok(score)
    }

    /// Uses the WDL tables to filter the root moves, keeping the moves of
    /// maximal [`Wdl`] value. This is a fallback for positions where the
    /// DTZ tables are missing.
    ///
    /// Returns the score of the root position. If any probe fails, no
    /// moves are filtered out.
    pub fn root_probe_wdl<S: Position + Clone>(
        &self,
        pos: &S,
        moves: &mut MoveList,
    ) -> SyzygyResult<Value> {
        let wdl = self.probe_wdl(pos)?;
        let score = WDL_TO_VALUE[(i32::from(wdl) + 2) as usize];

        let mut ranks = Vec::with_capacity(moves.len());
        let mut best = Wdl::Loss;

        for m in moves.iter() {
            let mut after = pos.clone();
            after.play_unchecked(&m);

            let v = -self.probe_wdl(&after)?;
            best = max(v, best);
            ranks.push(v);
        }

        let mut i = 0;
        moves.retain(|_| {
            let keep = ranks[i] == best;
            i += 1;
            keep
        });

        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    use shakmaty::fen::Fen;
    use shakmaty::{CastlingMode, Chess};

    use super::*;
    use crate::table::tests::KNVK_RTBW;

    fn fen(fen: &str) -> Chess {
        fen.parse::<Fen>()
            .expect("valid fen")
            .into_position(CastlingMode::Standard)
            .expect("legal position")
    }

    #[test]
    fn test_send_sync() {
        fn assert_send<T: Send>(_: T) {}
        fn assert_sync<T: Sync>(_: T) {}

        assert_send(Tablebase::new());
        assert_sync(Tablebase::new());
    }

    #[test]
    fn test_kvk() {
        let tables = Tablebase::new();
        let pos = fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1");

        assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Draw);
        assert_eq!(tables.probe_dtz(&pos).expect("probe dtz"), Dtz(0));
    }

    #[test]
    fn test_too_many_pieces() {
        let tables = Tablebase::new();
        assert!(matches!(
            tables.probe_wdl(&Chess::default()),
            Err(SyzygyError::TooManyPieces)
        ));
    }

    #[test]
    fn test_castling() {
        let tables = Tablebase::new();
        let pos = fen("4k3/8/8/8/8/8/8/4K2R w K - 0 1");
        assert!(matches!(
            tables.probe_wdl(&pos),
            Err(SyzygyError::Castling)
        ));
    }

    #[test]
    fn test_missing_table() {
        let tables = Tablebase::new();
        let pos = fen("4k3/8/8/8/8/8/8/Q3K3 w - - 0 1");
        assert!(matches!(
            tables.probe_wdl(&pos),
            Err(SyzygyError::MissingTable { .. })
        ));
    }

    #[test]
    fn test_init_disabled() {
        let mut tables = Tablebase::new();
        tables.init("<empty>");
        assert_eq!(tables.max_cardinality(), 0);

        tables.init("");
        assert_eq!(tables.max_cardinality(), 0);
    }

    #[test]
    fn test_init_registers_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("KNvK.rtbw"), KNVK_RTBW).expect("write table");

        let mut tables = Tablebase::new();
        tables.init(dir.path().to_str().expect("utf-8 path"));
        assert_eq!(tables.max_cardinality(), 3);

        let pos = fen("4k3/8/8/8/8/8/8/N3K3 w - - 0 1");
        assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Draw);

        // Probing is symmetric in the stored material.
        let pos = fen("4K3/8/8/8/8/8/8/n3k3 w - - 0 1");
        assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Draw);
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("KNvK.rtbw"), KNVK_RTBW).expect("write table");

        let mut tables = Tablebase::new();
        tables.init(dir.path().to_str().expect("utf-8 path"));
        tables.init(dir.path().to_str().expect("utf-8 path"));
        assert_eq!(tables.max_cardinality(), 3);
        assert_eq!(tables.wdl.len(), 1);

        tables.init("<empty>");
        assert_eq!(tables.max_cardinality(), 0);
        assert_eq!(tables.wdl.len(), 0);
    }

    #[test]
    fn test_concurrent_first_probe() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("KNvK.rtbw"), KNVK_RTBW).expect("write table");

        let mut tables = Tablebase::new();
        tables.init(dir.path().to_str().expect("utf-8 path"));
        let tables = Arc::new(tables);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tables = Arc::clone(&tables);
                thread::spawn(move || {
                    let pos = fen("4k3/8/8/8/8/8/8/N3K3 w - - 0 1");
                    tables.probe_wdl(&pos).expect("probe wdl")
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("join"), Wdl::Draw);
        }
    }

    #[test]
    fn test_dtz_cache_is_bounded() {
        let mut cache = DtzCache::default();

        for queens in 0..(2 * DTZ_ENTRIES) {
            let mut material: Material = "KQvK".parse().expect("valid");
            *material.white.by_role_mut(Role::Queen) = queens as u8;
            cache.insert(material, None);
        }

        assert_eq!(cache.entries.len(), DTZ_ENTRIES);
    }

    #[test]
    fn test_dtz_cache_touch_promotes() {
        let mut cache = DtzCache::default();

        let first: Material = "KQvK".parse().expect("valid");
        let second: Material = "KRvK".parse().expect("valid");
        cache.insert(first.clone(), None);
        cache.insert(second, None);

        assert!(cache.touch(&first).is_some());
        assert_eq!(cache.entries[0].material, first);

        let missing: Material = "KBvK".parse().expect("valid");
        assert!(cache.touch(&missing).is_none());
    }

    #[test]
    fn test_root_probe_draw() {
        let tables = Tablebase::new();
        let pos = fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1");

        let mut moves = pos.legal_moves();
        let total = moves.len();

        let score = tables
            .root_probe(&pos, &mut moves, false)
            .expect("root probe");

        assert_eq!(score, 0);
        assert_eq!(moves.len(), total);
    }

    #[test]
    fn test_root_probe_wdl_draw() {
        let tables = Tablebase::new();
        let pos = fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1");

        let mut moves = pos.legal_moves();
        let total = moves.len();

        let score = tables
            .root_probe_wdl(&pos, &mut moves)
            .expect("root probe wdl");

        assert_eq!(score, 0);
        assert_eq!(moves.len(), total);
    }
}
