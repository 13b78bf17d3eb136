//! Property-based test for overlay-prefix derivation (§8 round-trip
//! property): for any fingerprint of at least 12 bytes, the derived prefix
//! is always `0xFC` followed by bytes `[5, 12)` of the fingerprint, and
//! bytes `[0, 4)` and `[12, ..)` never influence it.

use proptest::prelude::*;

use tunnel_session::verify::derive_prefix;

proptest! {
    #[test]
    fn prefix_is_0xfc_followed_by_fingerprint_bytes_5_to_12(
        fingerprint in prop::collection::vec(any::<u8>(), 12..=20),
    ) {
        let prefix = derive_prefix(&fingerprint).expect("fingerprint is long enough");
        let bytes = prefix.0.to_be_bytes();

        prop_assert_eq!(bytes[0], 0xFC);
        prop_assert_eq!(&bytes[1..8], &fingerprint[5..12]);
    }

    #[test]
    fn prefix_is_stable_regardless_of_bytes_outside_the_derivation_window(
        fingerprint in prop::collection::vec(any::<u8>(), 12..=20),
        discarded_byte in any::<u8>(),
        tail_byte in any::<u8>(),
    ) {
        let mut perturbed = fingerprint.clone();
        perturbed[4] = discarded_byte;
        if perturbed.len() > 12 {
            let last = perturbed.len() - 1;
            perturbed[last] = tail_byte;
        }

        prop_assert_eq!(derive_prefix(&fingerprint), derive_prefix(&perturbed));
    }

    #[test]
    fn short_fingerprints_never_derive_a_prefix(
        fingerprint in prop::collection::vec(any::<u8>(), 0..12),
    ) {
        prop_assert_eq!(derive_prefix(&fingerprint), None);
    }
}
