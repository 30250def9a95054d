//! End-to-end probes against real table files.
//!
//! These tests need reference tables, which are too big to distribute as
//! fixtures. Point `RTBPROBE_TABLES` at a directory (or a `:`-separated
//! list of directories) containing at least the 3-, 4- and 5-piece WDL
//! and DTZ tables, e.g. from <https://tablebase.lichess.ovh/tables/>.
//! Without it every test in this file passes trivially.

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Position};

use rtbprobe::{Dtz, Tablebase, Wdl};

fn tables() -> Option<Tablebase> {
    let paths = std::env::var("RTBPROBE_TABLES").ok()?;
    let mut tables = Tablebase::new();
    tables.init(&paths);
    assert!(tables.max_cardinality() >= 3, "no tables found in RTBPROBE_TABLES");
    Some(tables)
}

fn fen(fen: &str) -> Chess {
    fen.parse::<Fen>()
        .expect("valid fen")
        .into_position(CastlingMode::Standard)
        .expect("legal position")
}

#[test]
fn test_kqvk_blocked_queen() {
    let Some(tables) = tables() else { return };

    // White to move is lost: the queen is pinned against stalemate
    // tricks and falls.
    let pos = fen("8/8/8/8/8/3k4/3q4/3K4 w - - 0 1");
    assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Loss);

    let dtz = tables.probe_dtz(&pos).expect("probe dtz");
    assert!(Dtz(-2) <= dtz && dtz <= Dtz(-1), "dtz = {:?}", dtz);
}

#[test]
fn test_kpvk_winning_pawn() {
    let Some(tables) = tables() else { return };

    let pos = fen("4k3/8/4K3/4P3/8/8/8/8 w - - 0 1");
    assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Win);

    let dtz = tables.probe_dtz(&pos).expect("probe dtz");
    assert!(Dtz(0) < dtz && dtz <= Dtz(28), "dtz = {:?}", dtz);
}

#[test]
fn test_krvk() {
    let Some(tables) = tables() else { return };

    let pos = fen("8/2k5/8/8/8/8/2K5/2R5 w - - 0 1");
    assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Win);

    let dtz = tables.probe_dtz(&pos).expect("probe dtz");
    assert!(Dtz(0) < dtz && dtz <= Dtz(16), "dtz = {:?}", dtz);
}

#[test]
fn test_black_pawn_wins() {
    let Some(tables) = tables() else { return };

    // From the point of view of the side to move.
    let pos = fen("8/8/8/8/8/8/p7/K6k b - - 0 1");
    assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Win);
}

#[test]
fn test_en_passant_dominates() {
    let Some(tables) = tables() else { return };

    let pos = fen("8/8/8/Pp6/8/8/8/K6k w - b6 0 1");
    let v = tables.probe_wdl(&pos).expect("probe wdl");

    // The result is never worse than the best en passant capture.
    let mut ep_moves = pos.en_passant_moves();
    let m = ep_moves.pop().expect("en passant possible");
    let mut after = pos.clone();
    after.play_unchecked(&m);
    let v_ep = -tables.probe_wdl(&after).expect("probe wdl");

    assert!(v >= v_ep, "{:?} < {:?}", v, v_ep);
}

#[test]
fn test_symmetry_invariance() {
    let Some(tables) = tables() else { return };

    // Mirroring (vertical flip and color swap) does not change the
    // result from the point of view of the side to move.
    for (pos, mirrored) in [
        (
            fen("8/8/8/8/8/3k4/3q4/3K4 w - - 0 1"),
            fen("3k4/3Q4/3K4/8/8/8/8/8 b - - 0 1"),
        ),
        (
            fen("4k3/8/4K3/4P3/8/8/8/8 w - - 0 1"),
            fen("8/8/8/8/4p3/4k3/8/4K3 b - - 0 1"),
        ),
    ] {
        assert_eq!(
            tables.probe_wdl(&pos).expect("probe wdl"),
            tables.probe_wdl(&mirrored).expect("probe wdl")
        );
    }
}

#[test]
fn test_wdl_dtz_sign_consistency() {
    let Some(tables) = tables() else { return };

    for position in [
        "4k3/8/8/8/8/8/8/4K3 w - - 0 1",
        "8/2k5/8/8/8/8/2K5/2R5 w - - 0 1",
        "8/8/8/8/8/3k4/3q4/3K4 w - - 0 1",
        "4k3/8/4K3/4P3/8/8/8/8 w - - 0 1",
        "8/8/8/8/8/8/p7/K6k b - - 0 1",
    ] {
        let pos = fen(position);
        let wdl = tables.probe_wdl(&pos).expect("probe wdl");
        let dtz = tables.probe_dtz(&pos).expect("probe dtz");

        assert_eq!(
            i32::from(wdl).signum(),
            i32::from(dtz).signum(),
            "{}: wdl = {:?}, dtz = {:?}",
            position,
            wdl,
            dtz
        );

        // Values within the 50-move window are exactly the non-cursed
        // outcomes.
        if wdl == Wdl::Win || wdl == Wdl::Loss {
            assert!(i32::from(dtz).abs() <= 100);
        } else if wdl == Wdl::CursedWin || wdl == Wdl::BlessedLoss {
            assert!(i32::from(dtz).abs() > 100);
        }
    }
}

#[test]
fn test_root_probe_keeps_winning_moves() {
    let Some(tables) = tables() else { return };

    let pos = fen("4k3/8/4K3/4P3/8/8/8/8 w - - 0 1");
    let mut moves = pos.legal_moves();

    let score = tables
        .root_probe(&pos, &mut moves, false)
        .expect("root probe");

    assert!(score > 0);
    assert!(!moves.is_empty());

    // Every kept move preserves the win.
    for m in moves {
        let mut after = pos.clone();
        after.play_unchecked(&m);
        assert_eq!(-tables.probe_wdl(&after).expect("probe wdl"), Wdl::Win);
    }
}
