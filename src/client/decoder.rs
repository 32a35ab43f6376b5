//! Response body decoding with the site's declared encoding

use encoding_rs::Encoding;

use crate::utils::error::FetchError;

/// Decoder bound to one encoding label (utf-8, big5, gbk, ...)
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    encoding: &'static Encoding,
}

impl Decoder {
    /// Create a decoder for an encoding label
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Decode` if the label is unknown
    pub fn new(label: &str) -> Result<Self, FetchError> {
        Encoding::for_label(label.trim().as_bytes())
            .map(|encoding| Self { encoding })
            .ok_or_else(|| FetchError::Decode(format!("unknown encoding {label}")))
    }

    /// Name of the bound encoding
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Decode bytes, failing on any malformed sequence
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Decode` if the bytes are not valid in this encoding
    pub fn decode(&self, bytes: &[u8]) -> Result<String, FetchError> {
        self.encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
            .ok_or_else(|| FetchError::Decode(format!("invalid {} content", self.name())))
    }
}
