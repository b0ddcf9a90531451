use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::SessionError;

/// Decode the base64 server address handed over by the embedding shell.
pub fn decode_server_address(encoded: &str) -> Result<String, SessionError> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(SessionError::InvalidAddress(
            "server address is empty".to_string(),
        ));
    }

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|error| SessionError::InvalidAddress(format!("not valid base64: {error}")))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|_| SessionError::InvalidAddress("decoded address is not UTF-8".to_string()))?;

    let decoded = decoded.trim();
    if decoded.is_empty() {
        return Err(SessionError::InvalidAddress(
            "decoded server address is blank".to_string(),
        ));
    }

    Ok(decoded.to_string())
}
