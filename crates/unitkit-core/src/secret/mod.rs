//! Sensitive field payloads.
//!
//! A secret-typed field holds a [`NamedSecret`]: a label used as lookup
//! key during resolution plus an optional payload. The payload lives in
//! a [`secrecy::SecretString`] so it is zeroized on drop and never
//! appears in debug output. Secret fields are opaque to the projection
//! layer: both the provenance projection and the dict projection omit
//! them unconditionally.
//!
//! Secret *stores* are external collaborators. The only seam exposed
//! here is [`SecretResolver`], which a vault implementation fills in at
//! bootstrap.

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::FieldType;

/// Errors surfaced by secret wrappers.
#[derive(Debug, Error)]
pub enum SecretError {
    /// `get` was called before a resolver filled the payload.
    #[error("secret '{label}' has not been resolved")]
    SecretUnresolved {
        /// Lookup label of the unresolved secret.
        label: String,
    },

    /// `resolve` was called on an already-resolved secret.
    #[error("secret '{label}' is already resolved")]
    AlreadyResolved {
        /// Lookup label of the secret.
        label: String,
    },

    /// The resolver could not supply a payload for the label.
    #[error("no secret registered under label '{label}'")]
    UnknownLabel {
        /// The label that failed to resolve.
        label: String,
    },
}

/// A wrapper for a piece of sensitive data, e.g. a password or token.
///
/// Constructed directly from a plain mapping during instance
/// construction; the payload is filled later by a [`SecretResolver`].
pub struct NamedSecret {
    label: String,
    expected: FieldType,
    value: Option<SecretString>,
}

impl NamedSecret {
    /// A new, unresolved secret.
    #[must_use]
    pub const fn new(label: String, expected: FieldType) -> Self {
        Self {
            label,
            expected,
            value: None,
        }
    }

    /// Builds a secret from the plain mapping given for a secret-typed
    /// field: `{"label": ..., "value"?: ...}`. A provided value resolves
    /// the secret immediately (test fixtures, inline config).
    #[must_use]
    pub fn from_mapping(mapping: &Map<String, Value>, expected: &FieldType) -> Option<Self> {
        let label = mapping.get("label")?.as_str()?.to_string();
        let value = match mapping.get("value") {
            None | Some(Value::Null) => None,
            // Strings are stored as-is; other payloads keep their JSON
            // text form.
            Some(v) => {
                let text = v.as_str().map_or_else(|| v.to_string(), str::to_string);
                Some(SecretString::from(text))
            },
        };
        Some(Self {
            label,
            expected: expected.clone(),
            value,
        })
    }

    /// Lookup label used during resolution.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Payload type the owning field expects.
    #[must_use]
    pub const fn expected_type(&self) -> &FieldType {
        &self.expected
    }

    /// Whether a payload has been filled in.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.value.is_some()
    }

    /// Resolves the payload.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::AlreadyResolved`] when called twice.
    pub fn resolve(&mut self, payload: SecretString) -> Result<(), SecretError> {
        if self.value.is_some() {
            return Err(SecretError::AlreadyResolved {
                label: self.label.clone(),
            });
        }
        self.value = Some(payload);
        Ok(())
    }

    /// Exposes the resolved payload.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::SecretUnresolved`] before resolution.
    pub fn get(&self) -> Result<&str, SecretError> {
        self.value
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .ok_or_else(|| SecretError::SecretUnresolved {
                label: self.label.clone(),
            })
    }
}

impl std::fmt::Debug for NamedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSecret")
            .field("label", &self.label)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

impl Clone for NamedSecret {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            expected: self.expected.clone(),
            value: self
                .value
                .as_ref()
                .map(|v| SecretString::from(v.expose_secret().to_string())),
        }
    }
}

/// Fills a secret wrapper's payload given its label and expected type.
///
/// Implemented by an external vault collaborator; injected at bootstrap.
pub trait SecretResolver {
    /// Looks up the payload for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::UnknownLabel`] when the label is not known.
    fn lookup(&self, label: &str, expected: &FieldType) -> Result<SecretString, SecretError>;

    /// Resolves a secret in place.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures and double resolution.
    fn fill(&self, secret: &mut NamedSecret) -> Result<(), SecretError> {
        let payload = self.lookup(secret.label(), secret.expected_type())?;
        secret.resolve(payload)
    }
}
