use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// v3 requests older than this are rejected outright.
const MAX_TIMESTAMP_SKEW_MS: i64 = 5 * 60 * 1000;

/// Verify a HubSpot v1 signature.
/// Header value is the hex SHA-256 of "<client-secret><raw-body>".
pub fn verify_v1(client_secret: &str, body: &[u8], signature_header: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(client_secret.as_bytes());
    hasher.update(body);
    let computed_hex = hex::encode(hasher.finalize());
    computed_hex == signature_header
}

/// Verify a HubSpot v3 signature.
/// Signed payload: "<method><uri><raw-body><timestamp>", HMAC-SHA256 with the
/// app's client secret, base64-encoded. The timestamp header is epoch millis.
pub fn verify_v3(
    client_secret: &str,
    method: &str,
    uri: &str,
    body: &[u8],
    timestamp_header: &str,
    signature_header: &str,
) -> bool {
    let timestamp: i64 = match timestamp_header.parse() {
        Ok(t) => t,
        Err(_) => return false,
    };
    let now = chrono::Utc::now().timestamp_millis();
    if (now - timestamp).abs() > MAX_TIMESTAMP_SKEW_MS {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(client_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(method.as_bytes());
    mac.update(uri.as_bytes());
    mac.update(body);
    mac.update(timestamp_header.as_bytes());
    let computed_b64 = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    computed_b64 == signature_header
}
