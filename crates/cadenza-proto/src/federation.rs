//! Compact peer-to-peer federation packet.
//!
//! Layout:
//!
//! ```text
//! byte 0     bit 7 = 1 (federation flag)
//!            bits 6..2 = room id character count (0..31)
//!            bits 1..0 = flags (0 normal, 1 monitor, 2..3 reserved)
//! bytes 1..4 player id, u32 LE
//! then       room id, 6 bits per character, K = ceil(count * 6 / 8) bytes
//! trailing   HMAC-SHA256 of all preceding bytes, truncated to 96 bits
//! ```
//!
//! The 64-character alphabet is exactly `A..Za..z0..9-_` mapped to 0..63.
//! Bit packing is little-endian within each byte: the low-order bits of
//! each character land in the lowest free bit positions first. MAC
//! comparison is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{command::RoomId, error::CodecError};

type HmacSha256 = Hmac<Sha256>;

/// MAC trailer length: 96 bits.
pub const MAC_LEN: usize = 12;

/// Longest room id a packet can carry (5-bit character count).
pub const MAX_PACKED_CHARS: usize = 31;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn char_value(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

/// Packed byte length for a room id of `chars` characters.
pub fn packed_len(chars: usize) -> usize {
    (chars * 6).div_ceil(8)
}

/// Pack a room id string at 6 bits per character.
///
/// Rejects strings longer than [`MAX_PACKED_CHARS`] or containing a
/// character outside the alphabet.
pub fn pack_room_id(id: &str) -> Result<Vec<u8>, CodecError> {
    if id.len() > MAX_PACKED_CHARS {
        return Err(CodecError::MalformedPacket("room id too long to pack"));
    }
    let mut out = Vec::with_capacity(packed_len(id.len()));
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for &c in id.as_bytes() {
        let v = char_value(c).ok_or(CodecError::MalformedPacket("room id outside alphabet"))?;
        acc |= u32::from(v) << bits;
        bits += 6;
        while bits >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push((acc & 0xff) as u8);
    }
    Ok(out)
}

/// Unpack `chars` characters from a 6-bit-packed buffer.
///
/// `packed` must be exactly [`packed_len`]`(chars)` bytes.
pub fn unpack_room_id(packed: &[u8], chars: usize) -> Result<String, CodecError> {
    if packed.len() != packed_len(chars) {
        return Err(CodecError::MalformedPacket("packed length mismatch"));
    }
    let mut out = String::with_capacity(chars);
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    let mut iter = packed.iter();
    for _ in 0..chars {
        while bits < 6 {
            let &byte = iter.next().ok_or(CodecError::UnexpectedEof)?;
            acc |= u32::from(byte) << bits;
            bits += 8;
        }
        out.push(char::from(ALPHABET[(acc & 0x3f) as usize]));
        acc >>= 6;
        bits -= 6;
    }
    Ok(out)
}

/// A cross-server join request travelling on the peer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactPacket {
    /// Joining player's external account id.
    pub player_id: u32,
    /// Target room on the destination server.
    pub room_id: RoomId,
    /// Whether the player joins as a monitor.
    pub monitor: bool,
}

impl CompactPacket {
    /// Encode and sign with the shared federation secret.
    pub fn encode(&self, key: &[u8]) -> Result<Vec<u8>, CodecError> {
        let id = self.room_id.as_str();
        let packed = pack_room_id(id)?;

        let mut out = Vec::with_capacity(5 + packed.len() + MAC_LEN);
        out.push(0x80 | ((id.len() as u8) << 2) | u8::from(self.monitor));
        out.extend_from_slice(&self.player_id.to_le_bytes());
        out.extend_from_slice(&packed);

        let mut mac = mac_for(key);
        mac.update(&out);
        out.extend_from_slice(&mac.finalize().into_bytes()[..MAC_LEN]);
        Ok(out)
    }

    /// Decode and authenticate a packet.
    ///
    /// Rejects packets whose federation flag is clear, whose length is
    /// inconsistent with the declared character count, whose flags are
    /// reserved, or whose MAC does not verify (constant-time comparison).
    pub fn decode(bytes: &[u8], key: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < 5 + MAC_LEN {
            return Err(CodecError::MalformedPacket("packet too short"));
        }
        let head = bytes[0];
        if head & 0x80 == 0 {
            return Err(CodecError::MalformedPacket("federation flag clear"));
        }
        let chars = usize::from((head >> 2) & 0x1f);
        let flags = head & 0x03;
        if flags > 1 {
            return Err(CodecError::MalformedPacket("reserved flags"));
        }
        let body_len = 5 + packed_len(chars);
        if bytes.len() != body_len + MAC_LEN {
            return Err(CodecError::MalformedPacket("length inconsistent with char count"));
        }

        let (body, tag) = bytes.split_at(body_len);
        let mut mac = mac_for(key);
        mac.update(body);
        mac.verify_truncated_left(tag).map_err(|_| CodecError::BadPacketMac)?;

        let player_id = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
        let room_id: RoomId =
            unpack_room_id(&body[5..], chars)?.try_into().map_err(|_| CodecError::InvalidRoomId)?;

        Ok(Self { player_id, room_id, monitor: flags == 1 })
    }
}

fn mac_for(key: &[u8]) -> HmacSha256 {
    // HMAC accepts any key length.
    #[allow(clippy::expect_used)]
    HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length")
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"test-federation-secret";

    fn packet(room: &str, monitor: bool) -> CompactPacket {
        CompactPacket {
            player_id: 0x1234_5678,
            room_id: room.try_into().unwrap(),
            monitor,
        }
    }

    #[test]
    fn roundtrip() {
        let p = packet("room1", false);
        let bytes = p.encode(KEY).unwrap();
        assert_eq!(CompactPacket::decode(&bytes, KEY).unwrap(), p);
    }

    #[test]
    fn monitor_flag_roundtrips() {
        let p = packet("Watchers-1", true);
        let bytes = p.encode(KEY).unwrap();
        assert!(CompactPacket::decode(&bytes, KEY).unwrap().monitor);
    }

    #[test]
    fn packed_len_matches_ceil() {
        for chars in 0..=31 {
            assert_eq!(packed_len(chars), (chars * 6 + 7) / 8);
        }
    }

    #[test]
    fn pack_unpack_roundtrip_all_alphabet() {
        let id = "AZaz09-_";
        let packed = pack_room_id(id).unwrap();
        assert_eq!(packed.len(), packed_len(id.len()));
        assert_eq!(unpack_room_id(&packed, id.len()).unwrap(), id);
    }

    #[test]
    fn pack_rejects_bad_chars() {
        assert!(pack_room_id("has space").is_err());
        assert!(pack_room_id(&"x".repeat(32)).is_err());
    }

    #[test]
    fn clear_msb_is_rejected() {
        let mut bytes = packet("room1", false).encode(KEY).unwrap();
        bytes[0] &= 0x7f;
        assert!(matches!(
            CompactPacket::decode(&bytes, KEY),
            Err(CodecError::MalformedPacket("federation flag clear"))
        ));
    }

    #[test]
    fn mutated_byte_fails_mac() {
        let good = packet("room1", false).encode(KEY).unwrap();
        for i in 1..good.len() {
            let mut bad = good.clone();
            bad[i] ^= 0x40;
            assert!(CompactPacket::decode(&bad, KEY).is_err(), "byte {i} mutation accepted");
        }
    }

    #[test]
    fn wrong_key_fails_mac() {
        let bytes = packet("room1", false).encode(KEY).unwrap();
        assert_eq!(CompactPacket::decode(&bytes, b"other-key"), Err(CodecError::BadPacketMac));
    }

    #[test]
    fn inconsistent_length_is_rejected() {
        let mut bytes = packet("room1", false).encode(KEY).unwrap();
        bytes.push(0);
        assert!(matches!(
            CompactPacket::decode(&bytes, KEY),
            Err(CodecError::MalformedPacket("length inconsistent with char count"))
        ));
    }

    #[test]
    fn reserved_flags_are_rejected() {
        // Flip a reserved flag bit and re-sign so only the flags are wrong.
        let p = packet("room1", false);
        let mut body = p.encode(KEY).unwrap();
        body.truncate(body.len() - MAC_LEN);
        body[0] |= 0x02;
        let mut mac = mac_for(KEY);
        mac.update(&body);
        let tag = mac.finalize().into_bytes();
        body.extend_from_slice(&tag[..MAC_LEN]);
        assert!(matches!(
            CompactPacket::decode(&body, KEY),
            Err(CodecError::MalformedPacket("reserved flags"))
        ));
    }
}
