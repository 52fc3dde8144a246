use machlink_communication::rpc::RpcAddress;
use machlink_core::Address;
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #[test]
    fn bit_increment_is_strictly_increasing(index in 0u16..u16::MAX, bit in 0u8..16) {
        let address = RpcAddress::bit(index, bit).unwrap();
        let next = address.increment().unwrap();
        prop_assert!(next > address);
        prop_assert!(next.is_word_area());
        prop_assert!(next.index() - address.index() <= 1);
    }

    #[test]
    fn bit_offsets_are_injective(index in 0u16..1000, bit in 0u8..16, steps in 1usize..64) {
        let start = RpcAddress::bit(index, bit).unwrap();
        let visited: HashSet<RpcAddress> =
            (0..steps).map(|n| start.offset(n).unwrap()).collect();
        prop_assert_eq!(visited.len(), steps);
    }

    #[test]
    fn bit_offset_matches_carry(index in 0u16..1000, bit in 0u8..16, steps in 0u8..200) {
        let start = RpcAddress::bit(index, bit).unwrap();
        let linear = u32::from(bit) + u32::from(steps);
        let expected = RpcAddress::bit(index + (linear / 16) as u16, (linear % 16) as u8);
        prop_assert_eq!(start.offset(usize::from(steps)), expected);
    }

    #[test]
    fn word_and_double_offsets_stay_in_area(index in 0u16..1000, steps in 0usize..100) {
        let word = RpcAddress::word(index).offset(steps).unwrap();
        let double = RpcAddress::double(index).offset(steps).unwrap();
        prop_assert!(word.is_word_area());
        prop_assert!(double.is_double_area());
        prop_assert_eq!(usize::from(word.index()), usize::from(index) + steps);
        prop_assert!(double > word);
    }
}
