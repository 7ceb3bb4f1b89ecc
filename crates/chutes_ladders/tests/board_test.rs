//! Tests for board geometry and landing arithmetic.

use chutes_ladders::{BoardError, BoardTable, Landing, TransitionKind, STANDARD_TRANSITIONS, WIN_SQUARE};
use proptest::prelude::*;

#[test]
fn test_standard_table_kinds() {
    let table = BoardTable::standard();
    assert_eq!(table.transitions().count(), STANDARD_TRANSITIONS.len());

    let ladders = table
        .transitions()
        .filter(|t| t.kind == TransitionKind::Ladder)
        .count();
    assert_eq!(ladders, 9);

    let top = table.transition(80).expect("80 is a ladder foot");
    assert_eq!(top.destination, WIN_SQUARE);
    assert_eq!(top.kind, TransitionKind::Ladder);

    let chute = table.transition(98).expect("98 is a chute head");
    assert_eq!(chute.destination, 78);
    assert_eq!(chute.kind, TransitionKind::Chute);

    assert!(table.transition(2).is_none());
}

#[test]
fn test_exact_win_and_overshoot() {
    let table = BoardTable::standard();

    let win = table.resolve(94, 6);
    assert!(win.is_win());
    assert_eq!(win.landing_square(), Some(100));

    let over = table.resolve(97, 5);
    assert_eq!(over.landing(), Landing::Overshoot);
    assert_eq!(over.raw(), 102);
    assert_eq!(over.landing_square(), None);
    assert_eq!(over.final_square(), None);
}

#[test]
fn test_landing_on_special_squares() {
    let table = BoardTable::standard();

    let ladder = table.resolve(25, 3);
    assert_eq!(ladder.landing(), Landing::Ladder { destination: 84 });
    assert_eq!(ladder.landing_square(), Some(28));
    assert_eq!(ladder.final_square(), Some(84));

    let chute = table.resolve(60, 2);
    assert_eq!(chute.landing(), Landing::Chute { destination: 19 });
    assert_eq!(chute.final_square(), Some(19));
}

#[test]
fn test_duplicate_base_rejected() {
    assert_eq!(
        BoardTable::new([(5, 20), (5, 30)]),
        Err(BoardError::DuplicateBase(5))
    );
}

#[test]
fn test_custom_table_accepted() {
    let table = BoardTable::new([(2, 50), (70, 3)]).expect("valid table");
    assert_eq!(table.resolve(0, 2).final_square(), Some(50));
    assert_eq!(table.resolve(66, 4).final_square(), Some(3));
    assert!(table.describe().contains("2 → 50 (ladder)"));
}

proptest! {
    #[test]
    fn resolve_matches_board_arithmetic(square in 0u8..100, delta in 1u8..=6) {
        let table = BoardTable::standard();
        let resolved = table.resolve(square, delta);
        let sum = u16::from(square) + u16::from(delta);

        prop_assert_eq!(resolved.raw(), sum);
        if sum > 100 {
            prop_assert_eq!(resolved.landing(), Landing::Overshoot);
            prop_assert_eq!(resolved.final_square(), None);
        } else if sum == 100 {
            prop_assert!(resolved.is_win());
        } else {
            let landed = sum as u8;
            prop_assert_eq!(resolved.landing_square(), Some(landed));
            let expected = table.transition(landed).map_or(landed, |t| t.destination);
            prop_assert_eq!(resolved.final_square(), Some(expected));
        }
    }

    #[test]
    fn final_square_is_never_a_base(square in 0u8..100, delta in 1u8..=6) {
        let table = BoardTable::standard();
        if let Some(rest) = table.resolve(square, delta).final_square() {
            prop_assert!(table.transition(rest).is_none());
        }
    }
}
