//! Client Credentials
//!
//! One signed credential format for every path that hands a token to a
//! client — the verification bridge, the confirmation email, and the
//! auth routes — plus password hashing for direct registration.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::account::User;
use crate::error::{BillingError, Result};

/// Access token lifetime (seven days, matching the confirmation email)
pub const TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Claims carried by the access credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signer/verifier for client credentials
#[derive(Clone)]
pub struct CredentialSigner {
    secret: String,
}

impl CredentialSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a credential bound to the given user
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };

        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|err| BillingError::Credential(err.to_string()))
    }

    /// Verify a credential and return its claims
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| BillingError::Credential(err.to_string()))
    }
}

// scrypt parameters: N=2^15, r=8, p=1, 64-byte key
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const KEY_LEN: usize = 64;

/// Hash a password for storage, `hex(salt):hex(key)` format
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex = hex::encode(salt);

    let key = derive_key(password, &salt_hex)?;
    Ok(format!("{salt_hex}:{}", hex::encode(key)))
}

/// Verify a password against a stored hash, in constant time
pub fn verify_password(hash: &str, password: &str) -> Result<bool> {
    let (salt_hex, key_hex) = hash
        .split_once(':')
        .ok_or_else(|| BillingError::Credential("malformed password hash".into()))?;
    let expected = hex::decode(key_hex)
        .map_err(|err| BillingError::Credential(format!("malformed password hash: {err}")))?;

    let derived = derive_key(password, salt_hex)?;
    Ok(derived.ct_eq(&expected).into())
}

fn derive_key(password: &str, salt_hex: &str) -> Result<Vec<u8>> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|err| BillingError::Credential(err.to_string()))?;

    let mut key = vec![0u8; KEY_LEN];
    scrypt::scrypt(password.as_bytes(), salt_hex.as_bytes(), &params, &mut key)
        .map_err(|err| BillingError::Credential(err.to_string()))?;
    Ok(key)
}
