//! Transport encodings for the HTTP-Redirect and HTTP-POST bindings.
//!
//! Redirect messages are raw-DEFLATE compressed then base64 encoded; POST
//! messages are base64 only, although some IdPs deflate them too.

use std::io::{Read, Write};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};

/// Upper bound on inflated message size.
pub const MAX_INFLATED_SIZE: u64 = 1024 * 1024;

/// Raw-DEFLATE `data`.
pub fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate raw-DEFLATE `data`, refusing output larger than [`MAX_INFLATED_SIZE`].
pub fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .take(MAX_INFLATED_SIZE + 1)
        .read_to_end(&mut out)?;
    if out.len() as u64 > MAX_INFLATED_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "inflated message too large",
        ));
    }
    Ok(out)
}

/// Encode a message for the HTTP-Redirect binding.
pub fn encode_redirect(xml: &str) -> std::io::Result<String> {
    Ok(STANDARD.encode(deflate(xml.as_bytes())?))
}

/// Decode an HTTP-Redirect binding payload back to XML, as the IdP would.
#[cfg(test)]
pub fn decode_redirect(encoded: &str) -> Result<String, String> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;
    let inflated = inflate(&compressed).map_err(|e| format!("inflate failed: {e}"))?;
    String::from_utf8(inflated).map_err(|e| format!("invalid UTF-8: {e}"))
}
