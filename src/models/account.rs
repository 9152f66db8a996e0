//! Represents a tenant identity derived from request credentials.

/// Account used whenever no credential can be parsed from a request.
pub const DEFAULT_ACCOUNT_ID: &str = "default-bucket-owner";

/// An account that owns zero or more buckets.
///
/// Accounts are created implicitly on first reference and never deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Identifier derived from the request credential.
    pub id: String,

    /// Human-readable name shown in listings; always the account id.
    pub display_name: String,
}

impl Account {
    /// An account displayed under its own id.
    pub fn with_default_name(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
        }
    }
}
