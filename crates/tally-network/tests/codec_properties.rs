//! Property tests for the frame codec

use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use tally_network::Message;
use tally_types::{Signature, SignedTransaction, Transaction};

fn address() -> impl Strategy<Value = String> {
    (any::<[u8; 4]>(), 1u16..=u16::MAX)
        .prop_map(|(ip, port)| format!("{}.{}.{}.{}:{}", ip[0], ip[1], ip[2], ip[3], port))
}

fn signed_tx() -> impl Strategy<Value = SignedTransaction> {
    (
        "[a-z0-9]{0,12}",
        "[0-9]{1,40}-65537",
        "[0-9]{1,40}-65537",
        any::<i64>(),
        vec(any::<u8>(), 0..64),
        vec(any::<u8>(), 0..64),
    )
        .prop_map(|(id, from, to, amount, signed_msg, msg)| SignedTransaction {
            tx: Transaction::new(id, from, to, amount),
            signature: Signature::new(signed_msg, msg),
        })
}

fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        address().prop_map(|sender| Message::JoinRequest { sender }),
        address().prop_map(|sender| Message::PeerListRequest { sender }),
        (address(), btree_set(address(), 0..8))
            .prop_map(|(sender, peers)| Message::PeerListResponse { sender, peers }),
        (address(), signed_tx())
            .prop_map(|(sender, signed_tx)| Message::Transaction { sender, signed_tx }),
    ]
}

proptest! {
    #[test]
    fn decode_inverts_encode(msg in message()) {
        let frame = msg.encode().unwrap();
        prop_assert_eq!(Message::decode(frame).unwrap(), msg);
    }

    #[test]
    fn frame_length_matches_payload(msg in message()) {
        let frame = msg.encode().unwrap();
        let announced = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        prop_assert_eq!(announced, frame.len() - 4);
    }
}
