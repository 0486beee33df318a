//! Lenient decoders shared by the link parsers.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Deserializer};

/// Input was not valid base64 in any accepted variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to decode base64: not valid in any encoding variant")]
pub struct Base64Error;

/// Decode base64 that may be padded or not, standard or URL-safe
///
/// Tries, in order: padded standard, unpadded standard, padded URL-safe,
/// unpadded URL-safe. Surrounding whitespace is ignored.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, Base64Error> {
    let input = input.trim();

    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .into_iter()
        .find_map(|engine| engine.decode(input).ok())
        .ok_or(Base64Error)
}

/// Deserialize an integer sent either as a JSON number or a numeric string
///
/// `null` and a missing key both read as zero.
pub(crate) fn flex_int<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flex {
        Number(u64),
        Text(String),
    }

    match Option::<Flex>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Flex::Number(n)) => Ok(n),
        Some(Flex::Text(s)) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("cannot convert {:?} to int", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_variants_agree() {
        // Encodes to "+/+/Pz5oaQ==" / "-_-_Pz5oaQ=="
        let raw = b"\xfb\xff\xbf?>hi";
        let variants = [
            STANDARD.encode(raw),
            STANDARD_NO_PAD.encode(raw),
            URL_SAFE.encode(raw),
            URL_SAFE_NO_PAD.encode(raw),
        ];

        for encoded in &variants {
            assert_eq!(decode_base64(encoded).unwrap(), raw, "variant {}", encoded);
        }
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(decode_base64("  aGk=\n").unwrap(), b"hi");
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(decode_base64("not base64!!"), Err(Base64Error));
    }

    #[derive(Deserialize)]
    struct Port {
        #[serde(default, deserialize_with = "flex_int")]
        port: u64,
    }

    #[test]
    fn test_flex_int() {
        let n: Port = serde_json::from_str(r#"{"port": 443}"#).unwrap();
        let s: Port = serde_json::from_str(r#"{"port": "8443"}"#).unwrap();
        let null: Port = serde_json::from_str(r#"{"port": null}"#).unwrap();
        let missing: Port = serde_json::from_str("{}").unwrap();

        assert_eq!(n.port, 443);
        assert_eq!(s.port, 8443);
        assert_eq!(null.port, 0);
        assert_eq!(missing.port, 0);
        assert!(serde_json::from_str::<Port>(r#"{"port": "abc"}"#).is_err());
    }
}
