use encoding_rs::{GB18030, GBK};
use log::debug;

/// Decodes Chinese names that permits pack into the MRZ as letters: every
/// four letters carry one double-byte GBK character, one hex nibble per
/// letter (A-J for 0-9, K-P for 10-15).
pub struct ChineseNameDecoder;

impl ChineseNameDecoder {
    /// Returns the input unchanged when it cannot be decoded.
    pub fn decode(encoded: &str) -> String {
        let stripped: String = encoded.chars().filter(|c| *c != '<').collect();
        match Self::to_gbk_bytes(&stripped) {
            Some(bytes) => Self::decode_gbk(&bytes).unwrap_or_else(|| {
                debug!("GBK decoding failed for {}", encoded);
                encoded.to_string()
            }),
            None => encoded.to_string(),
        }
    }

    /// Inverse of `decode` for a single GBK character, used to build test
    /// data and to check whether a filler run could carry a name.
    pub fn encode(name: &str) -> Option<String> {
        let (bytes, _, had_errors) = GBK.encode(name);
        if had_errors || bytes.len() % 2 != 0 {
            return None;
        }
        Some(
            bytes
                .iter()
                .flat_map(|b| [b >> 4, b & 0x0F])
                .map(|nibble| (b'A' + nibble) as char)
                .collect(),
        )
    }

    pub fn contains_chinese(text: &str) -> bool {
        text.chars().any(|c| {
            matches!(c as u32,
                0x3400..=0x4DBF
                | 0x4E00..=0x9FFF
                | 0xF900..=0xFAFF
                | 0x20000..=0x2A6DF
                | 0x2A700..=0x2EBEF)
        })
    }

    /// Whether a filler-stripped run has the shape of an encoded name.
    pub fn looks_encoded(text: &str) -> bool {
        let stripped: String = text.chars().filter(|c| *c != '<').collect();
        !stripped.is_empty() && stripped.len() % 4 == 0 && stripped.chars().all(|c| ('A'..='P').contains(&c))
    }

    fn to_gbk_bytes(stripped: &str) -> Option<Vec<u8>> {
        if stripped.is_empty() || stripped.len() % 4 != 0 {
            return None;
        }
        let nibbles: Option<Vec<u8>> = stripped
            .chars()
            .map(|c| match c {
                'A'..='P' => Some(c as u8 - b'A'),
                _ => None,
            })
            .collect();
        let nibbles = nibbles?;
        Some(nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
    }

    fn decode_gbk(bytes: &[u8]) -> Option<String> {
        for encoding in [GBK, GB18030] {
            let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
            if !had_errors {
                return Some(text.into_owned());
            }
        }
        None
    }
}
