use crate::support::Reg;
use machlink_core::{array::resolve_units, Address, Array, Priority, StoreError};
use proptest::prelude::*;

proptest! {
    #[test]
    fn increments_are_distinct_and_ordered(start in 0u32..1_000_000, n in 1usize..64) {
        let mut seen = vec![Reg(start)];
        for _ in 0..n {
            let next = seen.last().and_then(Address::increment).unwrap();
            prop_assert!(next > *seen.last().unwrap());
            seen.push(next);
        }
        let mut deduped = seen.clone();
        deduped.dedup();
        prop_assert_eq!(deduped.len(), n + 1);
    }

    #[test]
    fn every_slot_gets_a_unit(size in 1usize..16, custom in 0usize..16) {
        let custom = custom.min(size);
        let units: Vec<String> = (0..custom).map(|i| format!("U{}", i)).collect();
        let resolved = resolve_units(&units, size);

        prop_assert_eq!(resolved.len(), size);
        for (i, unit) in resolved.iter().enumerate() {
            if i < custom {
                prop_assert_eq!(unit, &units[i]);
            } else {
                prop_assert_eq!(unit, &(i + 1).to_string());
            }
        }
    }
}

#[test]
fn array_slots_follow_address_order() {
    let heaters: Array<Reg, f64> = Array::builder("heater", Reg(100), 4)
        .units(["bed", "tool"])
        .priority(Priority::Low)
        .build()
        .unwrap();

    let addresses: Vec<u32> = heaters.iter().map(|v| v.address().unwrap().0).collect();
    assert_eq!(addresses, vec![100, 101, 102, 103]);
    assert_eq!(heaters.units(), vec!["bed", "tool", "3", "4"]);
    assert_eq!(heaters.values(), vec![None; 4]);
}

#[test]
fn array_overflow_is_a_store_error() {
    let result: Result<Array<Reg, u16>, _> = Array::builder("tail", Reg(u32::MAX - 1), 3).build();
    assert!(matches!(
        result,
        Err(StoreError::AddressOverflow { index: 2, .. })
    ));
}
