//! Session token signing.
//!
//! One HS256 secret signs every session. The secret lives next to the
//! database so a restart keeps existing sessions valid; deleting the data
//! dir logs everyone out.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

const SESSION_TTL_SECS: i64 = 7 * 24 * 3600;
const SECRET_LEN: usize = 32;

/// Read the signing secret from `<data_dir>/session_secret`, or mint a
/// fresh 256-bit one on first run.
pub fn load_or_generate_session_secret(
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let path = Path::new(data_dir).join("session_secret");

    if path.exists() {
        let secret = std::fs::read(&path)?;
        if secret.len() == SECRET_LEN {
            return Ok(secret);
        }
        tracing::warn!(
            len = secret.len(),
            "Session secret has the wrong length, regenerating"
        );
    }

    let secret: [u8; SECRET_LEN] = rand::rng().random();
    std::fs::write(&path, secret)?;
    tracing::info!(path = %path.display(), "Session signing secret generated");
    Ok(secret.to_vec())
}

/// Mint a session token for a user: HS256, 7-day expiry.
pub fn issue_session_token(
    secret: &[u8],
    user_id: &str,
    handle: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    encode(
        &Header::default(),
        &Claims {
            sub: user_id.to_string(),
            handle: handle.to_string(),
            iat: now,
            exp: now + SESSION_TTL_SECS,
        },
        &EncodingKey::from_secret(secret),
    )
}

/// Check signature and expiry, returning the claims on success.
pub fn validate_session_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
}
