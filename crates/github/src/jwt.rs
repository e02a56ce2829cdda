//! GitHub App JWT minting.
//!
//! App JWTs authenticate *as the App* and are only good for exchanging into an
//! installation token. GitHub caps their lifetime at ten minutes and rejects
//! an `iat` in the future, so `iat` is backdated to absorb clock drift.

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pipeline::{AppId, ApplicationCredentials, CorrelationQueryError, CredentialError};
use serde::{Deserialize, Serialize};

/// Seconds `iat` is moved into the past.
const CLOCK_DRIFT_SECS: i64 = 60;

/// Lifetime of a minted JWT, measured from the real issue time.
const JWT_LIFETIME_SECS: i64 = 9 * 60;

/// Registered claims GitHub expects in an App JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Signs App JWTs with the App's RSA private key (RS256).
#[derive(Clone)]
pub struct AppJwtSigner {
    app_id: AppId,
    key: EncodingKey,
}

impl AppJwtSigner {
    /// Parses the private key from `credentials`.
    ///
    /// # Errors
    ///
    /// [`CredentialError::MalformedPrivateKey`] when the key is not an RSA PEM
    /// key (PKCS#1 or PKCS#8).
    pub fn from_credentials(creds: &ApplicationCredentials) -> Result<Self, CredentialError> {
        match EncodingKey::from_rsa_pem(creds.private_key().as_bytes()) {
            Ok(key) => Ok(Self {
                app_id: creds.app_id().clone(),
                key,
            }),
            Err(e) => Err(CredentialError::MalformedPrivateKey {
                reason: e.to_string(),
            }),
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Claims for a JWT issued at `now`.
    pub fn claims_at(&self, now: DateTime<Utc>) -> AppClaims {
        AppClaims {
            iat: (now - TimeDelta::seconds(CLOCK_DRIFT_SECS)).timestamp(),
            exp: (now + TimeDelta::seconds(JWT_LIFETIME_SECS)).timestamp(),
            iss: self.app_id.to_string(),
        }
    }

    /// Mints a JWT issued at `now`.
    pub fn sign(&self, now: DateTime<Utc>) -> Result<String, CorrelationQueryError> {
        let header = Header::new(Algorithm::RS256);
        let claims = self.claims_at(now);
        jsonwebtoken::encode(&header, &claims, &self.key)
            .map_err(|e| CorrelationQueryError::Authorization {
                status: None,
                message: format!("could not sign App JWT: {e}"),
            })
    }
}

impl std::fmt::Debug for AppJwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppJwtSigner")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}
