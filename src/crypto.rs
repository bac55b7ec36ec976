//! Kasa protocol payload obfuscation.
//! XOR autokey stream with initial key 171, shared by all protocol dialects on port 9999.
//!
//! This is obfuscation, not cryptographic protection: the keystream is
//! derived from the data itself and offers no confidentiality.

/// Initial key byte for the autokey stream.
const INITIAL_KEY: u8 = 171;

/// Encode a plaintext payload.
///
/// Each output byte is `key XOR plain`, and the *output* byte becomes the
/// key for the next position.
pub fn encode(plaintext: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plaintext
        .iter()
        .map(|&b| {
            key ^= b;
            key
        })
        .collect()
}

/// Decode a ciphered payload.
///
/// Each output byte is `key XOR cipher`, and the *ciphertext* byte (not the
/// output) becomes the key for the next position. The cipher is
/// self-synchronizing: the keystream is recovered from the ciphertext alone.
pub fn decode(ciphertext: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    ciphertext
        .iter()
        .map(|&b| {
            let plain = key ^ b;
            key = b;
            plain
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let samples: &[&[u8]] = &[
            b"",
            b"{}",
            br#"{"system":{"get_sysinfo":{}}}"#,
            &[0x00, 0xff, 0xab, 0x01],
        ];
        for s in samples {
            assert_eq!(decode(&encode(s)), *s);
        }
    }

    #[test]
    fn roundtrip_all_byte_values() {
        let s: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode(&encode(&s)), s);
    }

    #[test]
    fn encode_is_deterministic() {
        let payload = br#"{"system":{"get_sysinfo":{}},"time":{"get_time":{}}}"#;
        assert_eq!(encode(payload), encode(payload));
    }

    #[test]
    fn encode_known_vector() {
        // First byte is 171 ^ '{' (0x7b) = 0xd0, chained from there.
        let out = encode(b"{}");
        assert_eq!(out[0], 171 ^ b'{');
        assert_eq!(out[1], out[0] ^ b'}');
    }

    #[test]
    fn decode_empty() {
        assert!(decode(&[]).is_empty());
    }
}
