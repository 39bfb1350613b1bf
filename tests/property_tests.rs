use chrono::{Duration, NaiveDate};
use clinic_pharmacy_api::services::sales::{plan_depletion, LotBalance};
use proptest::prelude::*;
use uuid::Uuid;

fn lots_strategy() -> impl Strategy<Value = Vec<LotBalance>> {
    prop::collection::vec(0i32..50, 0..8).prop_map(|quantities| {
        let base = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        quantities
            .into_iter()
            .enumerate()
            .map(|(i, quantity)| LotBalance {
                lot_id: Uuid::new_v4(),
                expiry_date: base + Duration::days(i as i64 * 30),
                quantity,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn plan_covers_exactly_what_was_asked(lots in lots_strategy(), needed in 1i32..200) {
        let available: i64 = lots.iter().map(|l| i64::from(l.quantity)).sum();

        match plan_depletion(&lots, needed) {
            Ok(plan) => {
                prop_assert!(available >= i64::from(needed));
                let taken: i32 = plan.iter().map(|d| d.take).sum();
                prop_assert_eq!(taken, needed);
            }
            Err(shortfall) => {
                prop_assert!(available < i64::from(needed));
                prop_assert_eq!(shortfall.available, available);
            }
        }
    }

    #[test]
    fn no_lot_is_overdrawn(lots in lots_strategy(), needed in 1i32..200) {
        if let Ok(plan) = plan_depletion(&lots, needed) {
            for deduction in plan {
                let lot = lots.iter().find(|l| l.lot_id == deduction.lot_id).unwrap();
                prop_assert!(deduction.take > 0);
                prop_assert!(deduction.take <= lot.quantity);
                prop_assert_eq!(deduction.remaining, lot.quantity - deduction.take);
            }
        }
    }

    #[test]
    fn later_lot_touched_only_after_earlier_ones_empty(lots in lots_strategy(), needed in 1i32..200) {
        if let Ok(plan) = plan_depletion(&lots, needed) {
            // Every deduction but the last must empty its lot.
            for deduction in plan.iter().rev().skip(1) {
                prop_assert_eq!(deduction.remaining, 0);
            }
            // Deductions follow expiry order.
            let positions: Vec<usize> = plan
                .iter()
                .map(|d| lots.iter().position(|l| l.lot_id == d.lot_id).unwrap())
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
