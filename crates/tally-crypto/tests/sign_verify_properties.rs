//! Property tests for the sign/verify contract

use proptest::prelude::*;
use std::sync::OnceLock;
use tally_crypto::{generate_keypair, sign, verify, PrivateKey, PublicKey};

fn signer() -> &'static (PrivateKey, PublicKey) {
    static KEY: OnceLock<(PrivateKey, PublicKey)> = OnceLock::new();
    KEY.get_or_init(|| generate_keypair(512).unwrap())
}

fn other_signer() -> &'static (PrivateKey, PublicKey) {
    static KEY: OnceLock<(PrivateKey, PublicKey)> = OnceLock::new();
    KEY.get_or_init(|| generate_keypair(512).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn signature_by_matching_key_verifies(msg in proptest::collection::vec(any::<u8>(), 0..512)) {
        let (sk, pk) = signer();
        prop_assert!(verify(&sign(&msg, sk).unwrap(), &msg, pk));
    }

    #[test]
    fn signature_by_other_key_is_rejected(msg in proptest::collection::vec(any::<u8>(), 0..512)) {
        let (_, pk) = signer();
        let (other_sk, _) = other_signer();
        prop_assert!(!verify(&sign(&msg, other_sk).unwrap(), &msg, pk));
    }
}
