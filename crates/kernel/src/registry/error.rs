use thiserror::Error;

/// Errors from strict registry insertion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} '{id}' is already registered by '{owner}'")]
    Duplicate {
        kind: &'static str,
        id: String,
        owner: String,
    },
}
