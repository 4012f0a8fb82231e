//! Branded identifiers (spec §2 / §4.2). Each is an opaque string newtype
//! whose only constructor validates the invariants; there is no way to get
//! one into circulation that hasn't passed through `new`/`try_from_unknown`.

use std::fmt;

const MAX_ENTITY_ID_LEN: usize = 2048;
const MAX_ERROR_VALUE_LEN: usize = 120;
const ULID_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("invalid entity identifier '{0}': {1}")]
    InvalidEntityId(String, &'static str),
    #[error("invalid predicate '{0}': {1}")]
    InvalidPredicate(String, &'static str),
    #[error("invalid namespace '{0}': {1}")]
    InvalidNamespace(String, &'static str),
    #[error("invalid transaction identifier '{0}': {1}")]
    InvalidTransactionId(String, &'static str),
}

impl IdentifierError {
    /// Stable short error code, usable by callers building a §7 envelope.
    pub fn code(&self) -> &'static str {
        "InvalidIdentifier"
    }
}

fn truncate_for_display(s: &str) -> String {
    if s.chars().count() <= MAX_ERROR_VALUE_LEN {
        s.to_string()
    } else {
        let mut truncated: String = s.chars().take(MAX_ERROR_VALUE_LEN).collect();
        truncated.push_str("...");
        truncated
    }
}

fn has_control_or_zero_width(s: &str) -> bool {
    s.chars().any(|c| {
        c.is_control() || matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
    })
}

/// An absolute `http(s)://` URL identifying one entity, at most 2048 bytes,
/// free of control and zero-width characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierError> {
        let raw = raw.into();
        validate_entity_id(&raw)?;
        Ok(Self(raw))
    }

    /// The "assertion helper" path for callers that only have an
    /// unstructured (e.g. deserialized-JSON) value in hand. Rejects
    /// non-string types outright and truncates long offending values in the
    /// error message, per spec §4.2.
    pub fn try_from_unknown(value: &serde_json::Value) -> Result<Self, IdentifierError> {
        match value {
            serde_json::Value::String(s) => Self::new(s.clone()),
            other => Err(IdentifierError::InvalidEntityId(
                truncate_for_display(&other.to_string()),
                "expected a string value",
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(namespace, local_id)`: the namespace is the URL's
    /// origin (`scheme://host[:port]`), the local id is everything after
    /// the leading `/` of the path, plus any query/fragment.
    pub fn resolve_namespace(&self) -> Result<(Namespace, String), IdentifierError> {
        let url = url::Url::parse(&self.0).map_err(|_| {
            IdentifierError::InvalidEntityId(truncate_for_display(&self.0), "not a valid URL")
        })?;
        let namespace = Namespace::new(url.origin().ascii_serialization() + "/")?;
        let mut local_id = url.path().trim_start_matches('/').to_string();
        if let Some(query) = url.query() {
            local_id.push('?');
            local_id.push_str(query);
        }
        if let Some(fragment) = url.fragment() {
            local_id.push('#');
            local_id.push_str(fragment);
        }
        Ok((namespace, local_id))
    }

    /// The inverse of `resolve_namespace`: join a namespace and local id
    /// back into an entity identifier URL.
    pub fn from_parts(namespace: &Namespace, local_id: &str) -> Result<Self, IdentifierError> {
        let base = namespace.as_str().trim_end_matches('/');
        Self::new(format!("{base}/{local_id}"))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_entity_id(raw: &str) -> Result<(), IdentifierError> {
    if raw.len() > MAX_ENTITY_ID_LEN {
        return Err(IdentifierError::InvalidEntityId(
            truncate_for_display(raw),
            "exceeds maximum length of 2048 bytes",
        ));
    }
    if has_control_or_zero_width(raw) {
        return Err(IdentifierError::InvalidEntityId(
            truncate_for_display(raw),
            "contains control or zero-width characters",
        ));
    }
    let url = url::Url::parse(raw).map_err(|_| {
        IdentifierError::InvalidEntityId(truncate_for_display(raw), "not a valid absolute URL")
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(IdentifierError::InvalidEntityId(
            truncate_for_display(raw),
            "scheme must be http or https",
        ));
    }
    Ok(())
}

/// Non-empty predicate name: no colon, no whitespace, letters/digits/`_`/`$` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Predicate(String);

impl Predicate {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentifierError::InvalidPredicate(raw, "must not be empty"));
        }
        if raw.contains(':') || raw.chars().any(char::is_whitespace) {
            return Err(IdentifierError::InvalidPredicate(
                truncate_for_display(&raw),
                "must not contain ':' or whitespace",
            ));
        }
        if !raw.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            return Err(IdentifierError::InvalidPredicate(
                truncate_for_display(&raw),
                "must contain only letters, digits, '_', or '$'",
            ));
        }
        Ok(Self(raw))
    }

    pub fn try_from_unknown(value: &serde_json::Value) -> Result<Self, IdentifierError> {
        match value {
            serde_json::Value::String(s) => Self::new(s.clone()),
            other => Err(IdentifierError::InvalidPredicate(
                truncate_for_display(&other.to_string()),
                "expected a string value",
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute `http(s)://` URL used as a routing key; always normalized to end
/// in a trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierError> {
        let mut raw = raw.into();
        let url = url::Url::parse(&raw).map_err(|_| {
            IdentifierError::InvalidNamespace(truncate_for_display(&raw), "not a valid absolute URL")
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(IdentifierError::InvalidNamespace(
                truncate_for_display(&raw),
                "scheme must be http or https",
            ));
        }
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The default namespace used when a caller supplies no entity context.
    pub fn default_namespace() -> Self {
        Self("https://default.lattice.local/".to_string())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 26-character Crockford base32 (ULID alphabet), time-ordered transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierError> {
        let raw = raw.into();
        if raw.chars().count() != 26 {
            return Err(IdentifierError::InvalidTransactionId(
                truncate_for_display(&raw),
                "must be exactly 26 characters",
            ));
        }
        if !raw.chars().all(|c| {
            let upper = c.to_ascii_uppercase();
            ULID_ALPHABET.contains(&(upper as u8))
        }) {
            return Err(IdentifierError::InvalidTransactionId(
                truncate_for_display(&raw),
                "must use the Crockford base32 ULID alphabet (excludes I, L, O, U)",
            ));
        }
        Ok(Self(raw.to_ascii_uppercase()))
    }

    /// Generate a fresh, time-ordered transaction id from a millisecond
    /// epoch timestamp and an external randomness source. Per-shard
    /// engines call this with their own monotonic clock.
    pub fn generate(millis: u64, rng: &mut impl rand::RngCore) -> Self {
        let mut out = [0u8; 26];
        let mut t = millis & ((1u64 << 48) - 1);
        for i in (0..10).rev() {
            out[i] = ULID_ALPHABET[(t & 0x1f) as usize];
            t >>= 5;
        }
        let mut randomness = [0u8; 16];
        rng.fill_bytes(&mut randomness);
        for i in 0..16 {
            out[10 + i] = ULID_ALPHABET[(randomness[i] & 0x1f) as usize];
        }
        Self(String::from_utf8(out.to_vec()).expect("ULID alphabet is ASCII"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_requires_absolute_http_url() {
        assert!(EntityId::new("https://example.com/user/1").is_ok());
        assert!(EntityId::new("not a url").is_err());
        assert!(EntityId::new("ftp://example.com/user/1").is_err());
    }

    #[test]
    fn entity_id_rejects_control_characters() {
        assert!(EntityId::new("https://example.com/user/\u{0}1").is_err());
    }

    #[test]
    fn entity_id_length_bound() {
        let long = format!("https://example.com/{}", "a".repeat(3000));
        assert!(EntityId::new(long).is_err());
    }

    #[test]
    fn resolve_namespace_round_trips() {
        let id = EntityId::new("https://example.com/user/1").unwrap();
        let (ns, local) = id.resolve_namespace().unwrap();
        assert_eq!(ns.as_str(), "https://example.com/");
        assert_eq!(local, "user/1");
        let rebuilt = EntityId::from_parts(&ns, &local).unwrap();
        assert_eq!(rebuilt, id);
    }

    #[test]
    fn predicate_rules() {
        assert!(Predicate::new("friends").is_ok());
        assert!(Predicate::new("my_$cost").is_ok());
        assert!(Predicate::new("").is_err());
        assert!(Predicate::new("has:colon").is_err());
        assert!(Predicate::new("has space").is_err());
        assert!(Predicate::new("has-dash").is_err());
    }

    #[test]
    fn namespace_requires_absolute_url_and_normalizes_trailing_slash() {
        let ns = Namespace::new("https://example.com").unwrap();
        assert_eq!(ns.as_str(), "https://example.com/");
        assert!(Namespace::new("not a url").is_err());
    }

    #[test]
    fn transaction_id_validates_length_and_alphabet() {
        assert!(TransactionId::new("01ARZ3NDEKTSV4RRFFQ69G5FAV").is_ok());
        assert!(TransactionId::new("too-short").is_err());
        // 'I' is excluded from the Crockford alphabet.
        assert!(TransactionId::new("0IARZ3NDEKTSV4RRFFQ69G5FAV").is_err());
    }

    #[test]
    fn transaction_id_generate_is_well_formed() {
        let mut rng = rand::rngs::mock::StepRng::new(42, 7);
        let tx = TransactionId::generate(1_700_000_000_000, &mut rng);
        assert_eq!(tx.as_str().len(), 26);
        assert!(TransactionId::new(tx.as_str()).is_ok());
    }

    #[test]
    fn assertion_helper_rejects_non_string_and_truncates() {
        let err = EntityId::try_from_unknown(&serde_json::json!(42)).unwrap_err();
        assert_eq!(err.code(), "InvalidIdentifier");
        let long_value = serde_json::json!("x".repeat(5000));
        let err = EntityId::try_from_unknown(&long_value).unwrap_err();
        match err {
            IdentifierError::InvalidEntityId(msg, _) => assert!(msg.len() < 5000),
            _ => panic!("expected InvalidEntityId"),
        }
    }
}
