//! Crockford base32, the text encoding used for every binary field on the wire.
//!
//! Alphabet: `0123456789ABCDEFGHJKMNPQRSTVWXYZ`. Decoding is case-insensitive and
//! maps the look-alikes `O` to `0`, `I`/`L` to `1` and `U` to `V`.

use serde::{Deserializer, Serializer};
use std::fmt;

use crate::error::EncodingError;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

fn decode_char(c: u8) -> Option<u8> {
    let c = c.to_ascii_uppercase();
    match c {
        b'O' => Some(0),
        b'I' | b'L' => Some(1),
        b'U' => Some(27),
        _ => ALPHABET.iter().position(|&a| a == c).map(|p| p as u8),
    }
}

/// Encode bytes as Crockford base32 (no padding).
pub fn encode(bytes: &[u8]) -> String {
    let mut result = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits_in_buffer = 0;

    for &byte in bytes {
        buffer = (buffer << 8) | byte as u32;
        bits_in_buffer += 8;
        while bits_in_buffer >= 5 {
            bits_in_buffer -= 5;
            let idx = ((buffer >> bits_in_buffer) & 0x1F) as usize;
            result.push(ALPHABET[idx] as char);
        }
    }
    if bits_in_buffer > 0 {
        let idx = ((buffer << (5 - bits_in_buffer)) & 0x1F) as usize;
        result.push(ALPHABET[idx] as char);
    }
    result
}

/// Decode a Crockford base32 string. Trailing pad bits are dropped.
pub fn decode(s: &str) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits_in_buffer = 0;

    for c in s.bytes() {
        let val = decode_char(c).ok_or(EncodingError::InvalidCharacter(c as char))?;
        buffer = (buffer << 5) | val as u32;
        bits_in_buffer += 5;
        if bits_in_buffer >= 8 {
            bits_in_buffer -= 8;
            out.push((buffer >> bits_in_buffer) as u8);
        }
    }
    Ok(out)
}

/// Decode into a fixed-size array, rejecting any other length.
pub fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], EncodingError> {
    let bytes = decode(s)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| EncodingError::WrongLength {
            expected: N,
            actual: bytes.len(),
        })
}

/// Serialize a byte string as Crockford text for human-readable formats and as
/// raw bytes otherwise.
pub fn serialize_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(&encode(bytes))
    } else {
        serializer.serialize_bytes(bytes)
    }
}

/// Counterpart of [`serialize_bytes`] for fixed-size values.
pub fn deserialize_fixed<'de, D: Deserializer<'de>, const N: usize>(
    deserializer: D,
) -> Result<[u8; N], D::Error> {
    struct FixedVisitor<const N: usize>;

    impl<'de, const N: usize> serde::de::Visitor<'de> for FixedVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "{N} bytes or their Crockford base32 encoding")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            decode_fixed(v).map_err(E::custom)
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            v.try_into().map_err(|_| E::invalid_length(v.len(), &self))
        }

        fn visit_seq<A: serde::de::SeqAccess<'de>>(
            self,
            mut seq: A,
        ) -> Result<Self::Value, A::Error> {
            let mut arr = [0u8; N];
            for (i, byte) in arr.iter_mut().enumerate() {
                *byte = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
            }
            Ok(arr)
        }
    }

    if deserializer.is_human_readable() {
        deserializer.deserialize_str(FixedVisitor::<N>)
    } else {
        deserializer.deserialize_bytes(FixedVisitor::<N>)
    }
}

/// Serde adapter for variable-length byte fields (`#[serde(with = "taler_types::crock::vec")]`).
pub mod vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize_bytes(bytes, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            super::decode(&s).map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_vector() {
        // "foobar" in Crockford base32.
        assert_eq!(encode(b"foobar"), "CSQPYRK1E8");
    }

    #[test]
    fn decode_inverts_encode() {
        let data = [0u8, 1, 2, 250, 251, 252, 253, 254, 255];
        assert_eq!(decode(&encode(&data)).unwrap(), data);
    }

    #[test]
    fn decode_is_case_insensitive_and_maps_lookalikes() {
        assert_eq!(decode("csqpyrk1e8").unwrap(), b"foobar");
        assert_eq!(decode("O1").unwrap(), decode("01").unwrap());
        assert_eq!(decode("IL").unwrap(), decode("11").unwrap());
        assert_eq!(decode("UU").unwrap(), decode("VV").unwrap());
    }

    #[test]
    fn decode_rejects_invalid_characters() {
        assert_eq!(decode("AB*"), Err(EncodingError::InvalidCharacter('*')));
    }

    #[test]
    fn decode_fixed_checks_length() {
        let enc = encode(&[7u8; 32]);
        assert_eq!(decode_fixed::<32>(&enc).unwrap(), [7u8; 32]);
        assert!(matches!(
            decode_fixed::<64>(&enc),
            Err(EncodingError::WrongLength { expected: 64, actual: 32 })
        ));
    }

    #[test]
    fn empty_input() {
        assert_eq!(encode(&[]), "");
        assert!(decode("").unwrap().is_empty());
    }
}
