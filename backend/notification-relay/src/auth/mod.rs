/// Identity verification for push connections and notification submissions
///
/// Credentials are RS-signed JWTs. Public keys are loaded once at startup from a
/// directory of `*.pub` PEM files; a token is accepted if any loaded key validates it.
/// The `employee` claim becomes the identity subject and `area` its scope.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use actix_web::http::header;
use actix_web::HttpRequest;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use thiserror::Error;

use crate::models::Identity;

/// Query parameter carrying the credential when no header is present
pub const AUTH_QUERY_PARAM: &str = "auth";

const SUBJECT_CLAIM: &str = "employee";
const AREA_CLAIM: &str = "area";
const KEY_EXTENSION: &str = "pub";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No authorization header present")]
    Missing,

    #[error("You are not authorized to make this request")]
    Invalid,

    #[error("failed to read key directory {path}: {reason}")]
    KeyDirectory { path: PathBuf, reason: String },
}

/// Turns a bearer credential into a verified identity
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Pull the credential from the `Authorization` header, falling back to `?auth=`
pub fn extract_credential(req: &HttpRequest) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    from_header.or_else(|| {
        url::form_urlencoded::parse(req.query_string().as_bytes())
            .find(|(key, _)| key == AUTH_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|v| !v.is_empty())
    })
}

/// Extract and verify the credential carried by a request
pub fn authorize(req: &HttpRequest, verifier: &dyn IdentityVerifier) -> Result<Identity, AuthError> {
    let credential = extract_credential(req).ok_or(AuthError::Missing)?;
    verifier.verify(&credential)
}

/// Verifier backed by a directory of RSA public keys
pub struct KeyDirectoryVerifier {
    keys: Vec<(String, DecodingKey)>,
    validation: Validation,
}

impl KeyDirectoryVerifier {
    /// Load every `*.pub` key in `dir`; unparsable files are skipped
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, AuthError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| AuthError::KeyDirectory {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(KEY_EXTENSION))
            .collect();
        paths.sort();

        let mut keys = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let pem = match fs::read(&path) {
                Ok(pem) => pem,
                Err(e) => {
                    tracing::warn!(key = %name, error = %e, "failed to read public key");
                    continue;
                }
            };

            match DecodingKey::from_rsa_pem(&pem) {
                Ok(key) => keys.push((name, key)),
                Err(e) => tracing::warn!(key = %name, error = %e, "skipping unparsable public key"),
            }
        }

        if keys.is_empty() {
            tracing::warn!(dir = %dir.display(), "no usable public keys loaded; every credential will be rejected");
        } else {
            tracing::info!(dir = %dir.display(), count = keys.len(), "loaded public keys");
        }

        Ok(Self::from_keys(keys))
    }

    pub fn from_keys(keys: Vec<(String, DecodingKey)>) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];
        validation.required_spec_claims.clear();
        validation.validate_nbf = true;
        validation.validate_aud = false;

        Self { keys, validation }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

impl IdentityVerifier for KeyDirectoryVerifier {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        for (name, key) in &self.keys {
            let data = match decode::<HashMap<String, Value>>(credential, key, &self.validation) {
                Ok(data) => data,
                Err(e) => {
                    tracing::trace!(key = %name, error = %e, "key did not validate credential");
                    continue;
                }
            };

            let subject = data
                .claims
                .get(SUBJECT_CLAIM)
                .map(claim_text)
                .filter(|s| !s.is_empty())
                .ok_or(AuthError::Invalid)?;
            let area = data.claims.get(AREA_CLAIM).map(claim_text).unwrap_or_default();

            return Ok(Identity { subject, area });
        }

        Err(AuthError::Invalid)
    }
}

fn claim_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
