//! Identity provider boundary.
//!
//! Registration and the HTTP auth layer talk to identities only through
//! `IdentityProvider`. `LocalIdentityProvider` keeps accounts in the
//! document store, next to the records they own: PBKDF2-SHA256 password
//! hashes, and bearer sessions keyed by the SHA-256 digest of the token so
//! the store never holds a usable credential. Sessions expire; expired ones
//! are dropped when they are presented and whenever their owner signs in.

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::db::{decode, encode, DatabaseError, DocumentStore, Query, SetMode};
use crate::models::{paths, Role};

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
pub const MIN_PASSWORD_LENGTH: usize = 6;
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;

// ═══════════════════════════════════════════════════════════
// Boundary types
// ═══════════════════════════════════════════════════════════

/// Role and organization cached on the identity's credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub role: Option<Role>,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub uid: String,
    pub email: String,
}

/// Result of verifying a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: String,
    pub claims: Claims,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Email already registered: {0}")]
    EmailAlreadyExists(String),
    #[error("Invalid email: {0}")]
    InvalidEmail(String),
    #[error("Password shorter than {0} characters")]
    WeakPassword(usize),
    #[error("Invalid credential")]
    InvalidCredential,
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("Stored identity is unreadable: {0}")]
    CorruptRecord(String),
    #[error("Identity store error: {0}")]
    Store(#[from] DatabaseError),
}

pub trait IdentityProvider: Send + Sync {
    fn create_identity(&self, email: &str, password: &str) -> Result<IdentityRecord, IdentityError>;

    fn delete_identity(&self, uid: &str) -> Result<(), IdentityError>;

    fn set_claims(&self, uid: &str, claims: Claims) -> Result<(), IdentityError>;

    fn verify_credential(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;

    /// Exchange email + password for a bearer credential.
    fn sign_in(&self, email: &str, password: &str) -> Result<String, IdentityError>;
}

// ═══════════════════════════════════════════════════════════
// Token helpers
// ═══════════════════════════════════════════════════════════

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Generate a random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Session document ID for a bearer token.
fn token_key(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(hash_token(token))
}

/// Email-owner document ID for a normalized email.
fn email_key(email: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(email.as_bytes()))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

// ═══════════════════════════════════════════════════════════
// Stored records
// ═══════════════════════════════════════════════════════════

/// `identities/{uid}`. Salt and hash are standard base64.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecord {
    uid: String,
    email: String,
    salt: String,
    password_hash: String,
    #[serde(default)]
    claims: Claims,
    created_at: DateTime<Utc>,
}

/// `identity_emails/{digest}`: which uid holds an email.
#[derive(Debug, Serialize, Deserialize)]
struct EmailOwner {
    uid: String,
}

/// `sessions/{token digest}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    uid: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRecord {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ═══════════════════════════════════════════════════════════
// LocalIdentityProvider
// ═══════════════════════════════════════════════════════════

pub struct LocalIdentityProvider {
    store: Arc<dyn DocumentStore>,
    iterations: u32,
    token_ttl: Duration,
}

impl LocalIdentityProvider {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_iterations(store, DEFAULT_PBKDF2_ITERATIONS)
    }

    pub fn with_iterations(store: Arc<dyn DocumentStore>, iterations: u32) -> Self {
        Self {
            store,
            iterations: iterations.max(1),
            token_ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    /// How long an issued bearer token stays valid.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn account_count(&self) -> usize {
        paths::identities()
            .and_then(|collection| self.store.list_collection(&collection))
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Claims currently attached to `uid`.
    pub fn claims(&self, uid: &str) -> Result<Claims, IdentityError> {
        self.account(uid)?
            .map(|account| account.claims)
            .ok_or_else(|| IdentityError::UnknownIdentity(uid.to_string()))
    }

    fn derive(&self, password: &str, salt: &[u8]) -> Zeroizing<[u8; HASH_LENGTH]> {
        let mut out = Zeroizing::new([0u8; HASH_LENGTH]);
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, self.iterations, out.as_mut());
        out
    }

    fn account(&self, uid: &str) -> Result<Option<AccountRecord>, IdentityError> {
        match self.store.get(&paths::identity(uid)?)? {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    fn account_by_email(&self, email: &str) -> Result<Option<AccountRecord>, IdentityError> {
        let Some(doc) = self.store.get(&paths::identity_email(&email_key(email))?)? else {
            return Ok(None);
        };
        let owner: EmailOwner = decode(doc)?;
        Ok(self.account(&owner.uid)?.filter(|account| account.email == email))
    }

    fn password_matches(&self, account: &AccountRecord, password: &str) -> Result<bool, IdentityError> {
        let corrupt = |field: &str, e: base64::DecodeError| {
            IdentityError::CorruptRecord(format!("{field} of {}: {e}", account.uid))
        };
        let salt = STANDARD
            .decode(&account.salt)
            .map_err(|e| corrupt("salt", e))?;
        let expected = Zeroizing::new(
            STANDARD
                .decode(&account.password_hash)
                .map_err(|e| corrupt("passwordHash", e))?,
        );
        let candidate = self.derive(password, &salt);
        Ok(bool::from(candidate.as_slice().ct_eq(expected.as_slice())))
    }

    /// Delete `uid`'s sessions; with `expired_only`, just the ones past expiry.
    fn drop_sessions(&self, uid: &str, expired_only: bool) -> Result<usize, IdentityError> {
        let now = Utc::now();
        let sessions = self
            .store
            .query(&paths::sessions()?, &Query::new().where_eq("uid", uid))?;
        let mut removed = 0;
        for stored in sessions {
            if expired_only {
                let live = decode::<SessionRecord>(stored.data)
                    .map(|session| !session.expired(now))
                    .unwrap_or(false);
                if live {
                    continue;
                }
            }
            if self.store.delete(&stored.path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl IdentityProvider for LocalIdentityProvider {
    fn create_identity(&self, email: &str, password: &str) -> Result<IdentityRecord, IdentityError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(IdentityError::InvalidEmail(email));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(IdentityError::WeakPassword(MIN_PASSWORD_LENGTH));
        }

        let uid = Uuid::new_v4().simple().to_string();
        let owner_path = paths::identity_email(&email_key(&email))?;
        let owner = encode(&EmailOwner { uid: uid.clone() })?;
        if !self.store.create(&owner_path, owner.clone())? {
            if self.account_by_email(&email)?.is_some() {
                return Err(IdentityError::EmailAlreadyExists(email));
            }
            // Claim left behind by a create that never wrote its account.
            tracing::warn!(uid = %uid, "Reclaiming orphaned email claim");
            self.store.set(&owner_path, owner, SetMode::Overwrite)?;
        }

        let salt: [u8; SALT_LENGTH] = rand::random();
        let account = AccountRecord {
            uid: uid.clone(),
            email: email.clone(),
            salt: STANDARD.encode(salt),
            password_hash: STANDARD.encode(*self.derive(password, &salt)),
            claims: Claims::default(),
            created_at: Utc::now(),
        };
        let written = encode(&account)
            .and_then(|doc| self.store.set(&paths::identity(&uid)?, doc, SetMode::Overwrite));
        if let Err(e) = written {
            if let Err(cleanup) = self.store.delete(&owner_path) {
                tracing::error!(uid = %uid, error = %cleanup, "Failed to release email claim");
            }
            return Err(e.into());
        }

        tracing::info!(uid = %uid, "Identity created");
        Ok(IdentityRecord { uid, email })
    }

    fn delete_identity(&self, uid: &str) -> Result<(), IdentityError> {
        let account = self
            .account(uid)?
            .ok_or_else(|| IdentityError::UnknownIdentity(uid.to_string()))?;
        self.store.delete(&paths::identity(uid)?)?;

        let owner_path = paths::identity_email(&email_key(&account.email))?;
        if let Some(doc) = self.store.get(&owner_path)? {
            let owned = decode::<EmailOwner>(doc).map(|owner| owner.uid == uid).unwrap_or(true);
            if owned {
                self.store.delete(&owner_path)?;
            }
        }

        let revoked = self.drop_sessions(uid, false)?;
        tracing::info!(uid = %uid, revoked, "Identity deleted");
        Ok(())
    }

    fn set_claims(&self, uid: &str, claims: Claims) -> Result<(), IdentityError> {
        let claims = serde_json::to_value(&claims).map_err(DatabaseError::from)?;
        let updated = self.store.modify(&paths::identity(uid)?, &mut |current| {
            let mut doc = current?;
            doc.insert("claims".to_string(), claims.clone());
            Some(doc)
        })?;
        match updated {
            Some(_) => Ok(()),
            None => Err(IdentityError::UnknownIdentity(uid.to_string())),
        }
    }

    fn verify_credential(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let path = paths::session(&token_key(token))?;
        let Some(doc) = self.store.get(&path)? else {
            return Err(IdentityError::InvalidCredential);
        };
        let session: SessionRecord = decode(doc)?;
        if session.expired(Utc::now()) {
            self.store.delete(&path)?;
            tracing::debug!(uid = %session.uid, "Expired session removed");
            return Err(IdentityError::InvalidCredential);
        }

        let account = self
            .account(&session.uid)?
            .ok_or(IdentityError::InvalidCredential)?;
        Ok(VerifiedIdentity {
            uid: account.uid,
            email: account.email,
            claims: account.claims,
        })
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<String, IdentityError> {
        let email = normalize_email(email);
        let account = self
            .account_by_email(&email)?
            .ok_or(IdentityError::InvalidCredential)?;
        if !self.password_matches(&account, password)? {
            return Err(IdentityError::InvalidCredential);
        }

        let pruned = self.drop_sessions(&account.uid, true)?;
        let token = generate_token();
        let issued_at = Utc::now();
        let session = SessionRecord {
            uid: account.uid.clone(),
            issued_at,
            expires_at: issued_at + self.token_ttl,
        };
        self.store.set(
            &paths::session(&token_key(&token))?,
            encode(&session)?,
            SetMode::Overwrite,
        )?;
        tracing::debug!(uid = %account.uid, pruned, "Session issued");
        Ok(token)
    }
}
