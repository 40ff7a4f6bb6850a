//! Hash value store and `hash`/`digest`/`xhash` section codecs

use ewfkit_core::{Error, Result};

use crate::checksum::ewf_checksum;
use crate::header_values::parse_simple_xml;

/// Size of the `hash` section body (MD5 + 16 reserved + checksum)
pub const HASH_BODY_SIZE: usize = 36;
/// Size of the `digest` section body (MD5 + SHA1 + 40 padding + checksum)
pub const DIGEST_BODY_SIZE: usize = 80;

/// Well-known hash values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashValueId {
    Md5,
    Sha1,
}

impl HashValueId {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha1" => Some(Self::Sha1),
            _ => None,
        }
    }
}

/// MD5/SHA1 digests of the media, as lowercase hex strings
#[derive(Debug, Clone, Default)]
pub struct HashValues {
    md5: Option<String>,
    sha1: Option<String>,
    /// Keys outside the standard set (xhash extensions)
    extra: Vec<(String, String)>,
}

impl HashValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: HashValueId, value: impl Into<String>) {
        let value = value.into().to_ascii_lowercase();
        match id {
            HashValueId::Md5 => self.md5 = Some(value),
            HashValueId::Sha1 => self.sha1 = Some(value),
        }
    }

    pub fn get(&self, id: HashValueId) -> Option<&str> {
        match id {
            HashValueId::Md5 => self.md5.as_deref(),
            HashValueId::Sha1 => self.sha1.as_deref(),
        }
    }

    pub fn set_by_key(&mut self, key: &str, value: impl Into<String>) {
        match HashValueId::from_key(key) {
            Some(id) => self.set(id, value),
            None => {
                let value = value.into();
                if let Some(slot) = self.extra.iter_mut().find(|(k, _)| k == key) {
                    slot.1 = value;
                } else {
                    self.extra.push((key.to_string(), value));
                }
            }
        }
    }

    pub fn get_by_key(&self, key: &str) -> Option<&str> {
        match HashValueId::from_key(key) {
            Some(id) => self.get(id),
            None => self
                .extra
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
        }
    }

    pub fn set_md5_digest(&mut self, digest: [u8; 16]) {
        self.md5 = Some(hex::encode(digest));
    }

    pub fn set_sha1_digest(&mut self, digest: [u8; 20]) {
        self.sha1 = Some(hex::encode(digest));
    }

    pub fn md5_digest(&self) -> Option<[u8; 16]> {
        decode_fixed(self.md5.as_deref()?)
    }

    pub fn sha1_digest(&self) -> Option<[u8; 20]> {
        decode_fixed(self.sha1.as_deref()?)
    }

    /// Parse a `hash` section body
    pub fn parse_hash_section(&mut self, body: &[u8]) -> Result<()> {
        if body.len() < HASH_BODY_SIZE {
            return Err(Error::invalid_format(
                "hash section",
                format!("{} bytes, need {}", body.len(), HASH_BODY_SIZE),
            ));
        }
        let stored = u32::from_le_bytes(body[32..36].try_into().unwrap());
        if ewf_checksum(&body[..32]) != stored {
            return Err(Error::invalid_format("hash section", "checksum mismatch"));
        }
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&body[0..16]);
        self.set_md5_digest(md5);
        Ok(())
    }

    /// Serialise a `hash` section body
    pub fn to_hash_section(&self) -> Vec<u8> {
        let mut body = vec![0u8; HASH_BODY_SIZE];
        if let Some(md5) = self.md5_digest() {
            body[0..16].copy_from_slice(&md5);
        }
        let checksum = ewf_checksum(&body[..32]);
        body[32..36].copy_from_slice(&checksum.to_le_bytes());
        body
    }

    /// Parse a `digest` section body
    pub fn parse_digest_section(&mut self, body: &[u8]) -> Result<()> {
        if body.len() < DIGEST_BODY_SIZE {
            return Err(Error::invalid_format(
                "digest section",
                format!("{} bytes, need {}", body.len(), DIGEST_BODY_SIZE),
            ));
        }
        let stored = u32::from_le_bytes(body[76..80].try_into().unwrap());
        if ewf_checksum(&body[..76]) != stored {
            return Err(Error::invalid_format("digest section", "checksum mismatch"));
        }
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&body[0..16]);
        self.set_md5_digest(md5);
        let mut sha1 = [0u8; 20];
        sha1.copy_from_slice(&body[16..36]);
        self.set_sha1_digest(sha1);
        Ok(())
    }

    /// Serialise a `digest` section body
    pub fn to_digest_section(&self) -> Vec<u8> {
        let mut body = vec![0u8; DIGEST_BODY_SIZE];
        if let Some(md5) = self.md5_digest() {
            body[0..16].copy_from_slice(&md5);
        }
        if let Some(sha1) = self.sha1_digest() {
            body[16..36].copy_from_slice(&sha1);
        }
        let checksum = ewf_checksum(&body[..76]);
        body[76..80].copy_from_slice(&checksum.to_le_bytes());
        body
    }

    /// Generate the xhash XML form
    pub fn generate_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xhash>\n");
        if let Some(md5) = &self.md5 {
            out.push_str(&format!("\t<md5>{}</md5>\n", md5));
        }
        if let Some(sha1) = &self.sha1 {
            out.push_str(&format!("\t<sha1>{}</sha1>\n", sha1));
        }
        for (key, value) in &self.extra {
            out.push_str(&format!("\t<{0}>{1}</{0}>\n", key, value));
        }
        out.push_str("</xhash>\n\n");
        out
    }

    /// Parse the xhash XML form
    pub fn parse_xml(text: &str) -> Result<Self> {
        let mut values = Self::new();
        for (key, value) in parse_simple_xml(text, "xhash")? {
            values.set_by_key(&key, value);
        }
        Ok(values)
    }
}

fn decode_fixed<const N: usize>(hex_string: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(hex_string).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5_EMPTY: &str = "d41d8cd98f00b204e9800998ecf8427e";
    const SHA1_EMPTY: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn test_hash_section_roundtrip() {
        let mut values = HashValues::new();
        values.set(HashValueId::Md5, MD5_EMPTY);
        let body = values.to_hash_section();
        assert_eq!(body.len(), HASH_BODY_SIZE);

        let mut parsed = HashValues::new();
        parsed.parse_hash_section(&body).unwrap();
        assert_eq!(parsed.get(HashValueId::Md5), Some(MD5_EMPTY));
    }

    #[test]
    fn test_hash_section_checksum() {
        let mut values = HashValues::new();
        values.set(HashValueId::Md5, MD5_EMPTY);
        let mut body = values.to_hash_section();
        body[4] ^= 0xff;
        assert!(HashValues::new().parse_hash_section(&body).is_err());
    }

    #[test]
    fn test_digest_section_roundtrip() {
        let mut values = HashValues::new();
        values.set(HashValueId::Md5, MD5_EMPTY);
        values.set(HashValueId::Sha1, SHA1_EMPTY);
        let body = values.to_digest_section();
        assert_eq!(body.len(), DIGEST_BODY_SIZE);

        let mut parsed = HashValues::new();
        parsed.parse_digest_section(&body).unwrap();
        assert_eq!(parsed.get(HashValueId::Md5), Some(MD5_EMPTY));
        assert_eq!(parsed.get(HashValueId::Sha1), Some(SHA1_EMPTY));
    }

    #[test]
    fn test_xhash_roundtrip() {
        let mut values = HashValues::new();
        values.set(HashValueId::Md5, MD5_EMPTY);
        values.set_by_key("sha256", "aa".repeat(32));
        let xml = values.generate_xml();
        let parsed = HashValues::parse_xml(&xml).unwrap();
        assert_eq!(parsed.get(HashValueId::Md5), Some(MD5_EMPTY));
        assert_eq!(parsed.get_by_key("sha256"), Some("aa".repeat(32).as_str()));
    }

    #[test]
    fn test_digest_accessors() {
        let mut values = HashValues::new();
        values.set_md5_digest([0xab; 16]);
        assert_eq!(values.get(HashValueId::Md5), Some("ab".repeat(16).as_str()));
        assert_eq!(values.md5_digest(), Some([0xab; 16]));
        assert!(values.sha1_digest().is_none());
    }

    #[test]
    fn test_uppercase_input_normalised() {
        let mut values = HashValues::new();
        values.set(HashValueId::Md5, MD5_EMPTY.to_ascii_uppercase());
        assert_eq!(values.get(HashValueId::Md5), Some(MD5_EMPTY));
    }
}
