//! Checksum-protected byte-to-word transcoding for the textual wire format.
//!
//! Every input byte maps to one four-letter word from a fixed dictionary; a
//! four-byte CRC-32 of the input is appended before the mapping so any
//! single-character corruption is caught at decode time.

mod wordlist;

use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use crate::error::CodecError;
use crate::util::checksum::crc32;
use wordlist::WORDS;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Style {
    /// full words, space separated
    Standard,
    /// full words, hyphen separated (URI-safe)
    Uri,
    /// first and last letter of each word, concatenated without separators
    Minimal,
}

/// word -> byte, for the full-word styles
fn word_index() -> &'static FxHashMap<&'static str, u8> {
    static INDEX: OnceLock<FxHashMap<&'static str, u8>> = OnceLock::new();
    INDEX.get_or_init(|| {
        WORDS
            .iter()
            .enumerate()
            .map(|(i, w)| (*w, i as u8))
            .collect()
    })
}

/// (first letter, last letter) -> byte, for the minimal style
fn pair_index() -> &'static FxHashMap<(u8, u8), u8> {
    static INDEX: OnceLock<FxHashMap<(u8, u8), u8>> = OnceLock::new();
    INDEX.get_or_init(|| {
        WORDS
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let b = w.as_bytes();
                ((b[0], b[3]), i as u8)
            })
            .collect()
    })
}

pub fn encode(data: &[u8], style: Style) -> String {
    let mut buf = Vec::with_capacity(data.len() + 4);
    buf.extend_from_slice(data);
    buf.extend_from_slice(&crc32(data).to_be_bytes());

    match style {
        Style::Standard => to_words(&buf, " "),
        Style::Uri => to_words(&buf, "-"),
        Style::Minimal => {
            let mut result = String::with_capacity(buf.len() * 2);
            for byte in buf {
                let word = WORDS[byte as usize].as_bytes();
                result.push(word[0] as char);
                result.push(word[3] as char);
            }
            result
        }
    }
}

fn to_words(buf: &[u8], separator: &str) -> String {
    buf.iter()
        .map(|&byte| WORDS[byte as usize])
        .collect::<Vec<_>>()
        .join(separator)
}

/// Reverses [encode], verifying and stripping the trailing checksum.
pub fn decode(encoded: &str, style: Style) -> Result<Vec<u8>, CodecError> {
    let encoded = encoded.to_lowercase();

    let buf = match style {
        Style::Standard => from_words(&encoded, ' ')?,
        Style::Uri => from_words(&encoded, '-')?,
        Style::Minimal => from_pairs(&encoded)?,
    };

    if buf.len() < 4 {
        return Err(CodecError::MalformedFrame(format!(
            "{} bytes is too short for a checksummed body",
            buf.len()
        )));
    }

    let (data, footer) = buf.split_at(buf.len() - 4);
    if footer != crc32(data).to_be_bytes() {
        return Err(CodecError::ChecksumMismatch);
    }
    Ok(data.to_vec())
}

fn from_words(encoded: &str, separator: char) -> Result<Vec<u8>, CodecError> {
    encoded
        .split(separator)
        .map(|word| {
            word_index()
                .get(word)
                .copied()
                .ok_or_else(|| CodecError::MalformedFrame(format!("unknown word '{word}'")))
        })
        .collect()
}

fn from_pairs(encoded: &str) -> Result<Vec<u8>, CodecError> {
    let bytes = encoded.as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(CodecError::MalformedFrame(
            "odd number of characters in minimal encoding".to_string(),
        ));
    }

    bytes
        .chunks(2)
        .map(|pair| {
            pair_index()
                .get(&(pair[0], pair[1]))
                .copied()
                .ok_or_else(|| {
                    CodecError::MalformedFrame(format!(
                        "unknown letter pair '{}{}'",
                        pair[0] as char, pair[1] as char
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::standard(Style::Standard, "able acid also lava zoom jade need echo taxi")]
    #[case::uri(Style::Uri, "able-acid-also-lava-zoom-jade-need-echo-taxi")]
    #[case::minimal(Style::Minimal, "aeadaolazmjendeoti")]
    fn test_golden_encode(#[case] style: Style, #[case] expected: &str) {
        let input = [0u8, 1, 2, 128, 255];
        assert_eq!(encode(&input, style), expected);
        assert_eq!(decode(expected, style).unwrap(), input);
    }

    #[test]
    fn test_empty_payload() {
        // checksum of nothing is zero, so the body is four 'able' words
        assert_eq!(encode(&[], Style::Minimal), "aeaeaeae");
        assert_eq!(decode("aeaeaeae", Style::Minimal).unwrap(), Vec::<u8>::new());
    }

    #[rstest]
    #[case::standard(Style::Standard)]
    #[case::uri(Style::Uri)]
    #[case::minimal(Style::Minimal)]
    fn test_roundtrip(#[case] style: Style) {
        let data = crate::util::xoshiro::Xoshiro256::from("bytewords").next_data(100);
        assert_eq!(decode(&encode(&data, style), style).unwrap(), data);
    }

    #[test]
    fn test_decode_is_case_insensitive() {
        assert_eq!(
            decode("AEADAOLAZMJENDEOTI", Style::Minimal).unwrap(),
            vec![0u8, 1, 2, 128, 255]
        );
    }

    #[test]
    fn test_corrupted_character_fails_checksum() {
        let encoded = encode(b"some payload", Style::Minimal);
        let mut chars: Vec<char> = encoded.chars().collect();
        // flip one character to another that still forms valid words
        chars[0] = if chars[0] == 'a' { 'z' } else { 'a' };
        let corrupted: String = chars.into_iter().collect();

        match decode(&corrupted, Style::Minimal) {
            Err(CodecError::ChecksumMismatch) | Err(CodecError::MalformedFrame(_)) => {}
            other => panic!("corruption not detected: {other:?}"),
        }
    }

    #[rstest]
    #[case::unknown_word("able acid zzzz", Style::Standard)]
    #[case::unknown_pair("aeadqq", Style::Minimal)]
    #[case::odd_length("aeada", Style::Minimal)]
    #[case::wrong_separator("able-acid-also", Style::Standard)]
    fn test_malformed_input(#[case] encoded: &str, #[case] style: Style) {
        assert!(matches!(
            decode(encoded, style),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_too_short_for_checksum() {
        assert!(matches!(
            decode("aeadao", Style::Minimal),
            Err(CodecError::MalformedFrame(_))
        ));
    }
}
