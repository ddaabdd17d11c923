//! # Token Codec
//!
//! Wire format of a QR visit token:
//!
//! ```text
//! branchId|issuedAtSeconds|nonce|digestHex
//! ```
//!
//! The digest is `sha256("branchId|issuedAt|nonce")` as lowercase hex,
//! truncated to [`DIGEST_HEX_LEN`] characters. It is an unkeyed integrity
//! check against accidental or casual tampering, not a signature; comparison
//! is a plain string equality.

use sha2::{Digest, Sha256};

use super::entities::{BranchId, ClientId, ContentHash, QrToken};
use super::errors::FormatError;

/// Field separator of the wire format.
pub const FIELD_SEPARATOR: char = '|';

/// Number of hex characters kept from the digest.
pub const DIGEST_HEX_LEN: usize = 16;

const FIELD_COUNT: usize = 4;

/// Compute the truncated digest over the token's wire fields.
pub fn compute_digest(branch_id: &str, issued_at: u64, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(branch_id.as_bytes());
    hasher.update(b"|");
    hasher.update(issued_at.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(nonce.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_HEX_LEN);
    digest
}

/// Content hash of a full token string; the replay ledger key.
pub fn content_hash(raw: &str) -> ContentHash {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Build and serialize a token for `client_id`.
pub fn encode(
    client_id: &str,
    branch_id: &str,
    issued_at: u64,
    nonce: &str,
) -> Result<String, FormatError> {
    QrToken::new(client_id.to_string(), branch_id.to_string(), issued_at, nonce.to_string())
        .map(|token| token.encode())
}

/// Parse a scanned payload.
///
/// Surrounding whitespace (scanner line endings) is ignored. The returned
/// token has no `client_id`.
pub fn decode(raw: &str) -> Result<QrToken, FormatError> {
    let raw = raw.trim();
    if !raw.is_ascii() {
        return Err(FormatError::NonAscii);
    }

    let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
    if fields.len() != FIELD_COUNT {
        return Err(FormatError::FieldCount {
            found: fields.len(),
        });
    }

    let (branch_id, issued_at, nonce, digest) = (fields[0], fields[1], fields[2], fields[3]);
    for (name, value) in [
        ("branch_id", branch_id),
        ("issued_at", issued_at),
        ("nonce", nonce),
        ("digest", digest),
    ] {
        if value.is_empty() {
            return Err(FormatError::EmptyField { field: name });
        }
    }

    // u64::from_str tolerates a leading '+', the wire format does not
    if !issued_at.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::InvalidTimestamp(issued_at.to_string()));
    }
    let issued_at: u64 = issued_at
        .parse()
        .map_err(|_| FormatError::InvalidTimestamp(issued_at.to_string()))?;

    hex::decode(digest).map_err(|e| FormatError::InvalidDigest(e.to_string()))?;

    Ok(QrToken {
        client_id: None,
        branch_id: branch_id.to_string(),
        issued_at,
        nonce: nonce.to_string(),
        digest: digest.to_string(),
    })
}

/// Recompute the digest of `token` and compare it with the embedded one.
pub fn validate_digest(token: &QrToken) -> bool {
    compute_digest(&token.branch_id, token.issued_at, &token.nonce) == token.digest
}

fn check_field(field: &'static str, value: &str) -> Result<(), FormatError> {
    if value.is_empty() {
        return Err(FormatError::EmptyField { field });
    }
    if value.contains(FIELD_SEPARATOR) {
        return Err(FormatError::EmbeddedSeparator { field });
    }
    if !value.is_ascii() {
        return Err(FormatError::NonAscii);
    }
    Ok(())
}

impl QrToken {
    /// Create a token with a freshly computed digest.
    pub fn new(
        client_id: ClientId,
        branch_id: BranchId,
        issued_at: u64,
        nonce: String,
    ) -> Result<Self, FormatError> {
        check_field("client_id", &client_id)?;
        check_field("branch_id", &branch_id)?;
        check_field("nonce", &nonce)?;

        let digest = compute_digest(&branch_id, issued_at, &nonce);
        Ok(Self {
            client_id: Some(client_id),
            branch_id,
            issued_at,
            nonce,
            digest,
        })
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.branch_id,
            self.issued_at,
            self.nonce,
            self.digest,
            sep = FIELD_SEPARATOR
        )
    }

    /// Content hash of the encoded form.
    pub fn content_hash(&self) -> ContentHash {
        content_hash(&self.encode())
    }
}
