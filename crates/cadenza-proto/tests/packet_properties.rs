//! Property tests for the compact federation packet.

use cadenza_proto::{
    CompactPacket,
    federation::{pack_room_id, packed_len, unpack_room_id},
};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn six_bit_packing_roundtrips(id in "[A-Za-z0-9_-]{0,20}") {
        let packed = pack_room_id(&id).expect("alphabet-only input");
        prop_assert_eq!(packed.len(), packed_len(id.len()));
        prop_assert_eq!(unpack_room_id(&packed, id.len()).expect("well-formed"), id);
    }

    #[test]
    fn signed_packet_roundtrips(
        player_id in any::<u32>(),
        id in "[A-Za-z0-9_-]{1,20}",
        monitor in any::<bool>(),
        key in prop::collection::vec(any::<u8>(), 8..40),
    ) {
        let packet = CompactPacket {
            player_id,
            room_id: id.as_str().try_into().expect("valid room id"),
            monitor,
        };
        let bytes = packet.encode(&key).expect("encodable");
        prop_assert_eq!(CompactPacket::decode(&bytes, &key).expect("verifies"), packet);
    }

    #[test]
    fn any_single_bit_flip_is_rejected(
        id in "[A-Za-z0-9_-]{1,20}",
        byte_index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let packet = CompactPacket {
            player_id: 77,
            room_id: id.as_str().try_into().expect("valid room id"),
            monitor: false,
        };
        let key = b"shared-secret";
        let good = packet.encode(key).expect("encodable");
        let mut bad = good.clone();
        let i = byte_index.index(bad.len());
        bad[i] ^= 1 << bit;
        // Every mutation must be rejected: structurally or by the MAC.
        prop_assert!(CompactPacket::decode(&bad, key).is_err());
    }

    #[test]
    fn clear_msb_never_decodes(bytes in prop::collection::vec(any::<u8>(), 17..48)) {
        let mut bytes = bytes;
        bytes[0] &= 0x7f;
        prop_assert!(CompactPacket::decode(&bytes, b"any-key").is_err());
    }
}
