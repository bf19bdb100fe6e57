//! Stream authentication capability
//!
//! ## Responsibilities
//!
//! - Injected credential verification callback (the core never stores
//!   credentials; the admin layer wires in its user store here)
//! - HTTP Basic `Authorization` header decoding

use base64::Engine;
use std::sync::Arc;

/// Credential verification callback, injected per camera when stream
/// authentication is enabled.
pub type AuthVerifier = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Decode an HTTP Basic `Authorization` header value into `(username, password)`.
///
/// Returns `None` for missing prefix, invalid base64, or a payload
/// without a `:` separator.
pub fn decode_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
