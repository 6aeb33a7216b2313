use thiserror::Error;

/// Unexpected price source failures. An unknown car id is not one of these:
/// lookups report it as `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceSourceError {
    #[error("price source unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

/// Auth collaborator failures. Messages are shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("the email address is badly formatted")]
    InvalidEmail,

    #[error("password should be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("the email address is already in use by another account")]
    EmailInUse,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("network error: {0}")]
    Network(String),

    #[error("no user is signed in")]
    NotSignedIn,

    #[error("{0}")]
    Other(String),
}
