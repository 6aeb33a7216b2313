//! Auth collaborator.
//!
//! Tracking only needs the signed-in uid; everything else here exists so
//! the binary and tests have something that behaves like a hosted identity
//! service (validation, duplicate accounts, offline failures, a bootstrap
//! loading phase).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info};

use crate::error::AuthError;
use crate::types::User;

pub const MIN_PASSWORD_LEN: usize = 6;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;

    /// True until the provider has reported its first auth state.
    fn is_loading(&self) -> bool;

    async fn login(&self, email: &str, password: &str) -> Result<User, AuthError>;

    async fn signup(&self, email: &str, password: &str) -> Result<User, AuthError>;

    async fn logout(&self) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    pub is_loading: bool,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn check_email(email: &str) -> Result<(), AuthError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(AuthError::InvalidEmail);
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(AuthError::InvalidEmail);
    }
    Ok(())
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword { min: MIN_PASSWORD_LEN });
    }
    Ok(())
}

/// Sign-up form check: confirmation must match before anything is sent.
pub fn validate_signup(email: &str, password: &str, confirm: &str) -> Result<(), AuthError> {
    if password != confirm {
        return Err(AuthError::PasswordMismatch);
    }
    check_email(&normalize_email(email))?;
    check_password(password)
}

struct Account {
    uid: String,
    password: String,
}

/// In-memory identity service.
pub struct MockAuthProvider {
    accounts: RwLock<HashMap<String, Account>>,
    state: watch::Sender<AuthState>,
    offline: AtomicBool,
    latency: Duration,
}

impl MockAuthProvider {
    pub fn new(latency: Duration) -> Self {
        let (state, _) = watch::channel(AuthState {
            user: None,
            is_loading: true,
        });
        Self {
            accounts: RwLock::new(HashMap::new()),
            state,
            offline: AtomicBool::new(false),
            latency,
        }
    }

    /// Pre-register an account with a fixed uid.
    pub fn with_account(self, uid: &str, email: &str, password: &str) -> Self {
        self.accounts.write().insert(
            normalize_email(email),
            Account {
                uid: uid.to_string(),
                password: password.to_string(),
            },
        );
        self
    }

    /// First auth-state report: nobody signed in, loading done.
    pub fn bootstrap(&self) {
        self.state.send_modify(|s| s.is_loading = false);
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Simulate losing connectivity to the identity service.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    fn ensure_online(&self) -> Result<(), AuthError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(AuthError::Network("identity service unreachable".to_string()));
        }
        Ok(())
    }

    fn set_user(&self, user: Option<User>) {
        self.state.send_modify(|s| {
            s.user = user;
            s.is_loading = false;
        });
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        sleep(self.latency).await;
        self.ensure_online()?;

        let email = normalize_email(email);
        check_email(&email)?;

        let user = {
            let accounts = self.accounts.read();
            match accounts.get(&email) {
                Some(acct) if acct.password == password => User {
                    uid: acct.uid.clone(),
                    email: email.clone(),
                },
                _ => return Err(AuthError::InvalidCredentials),
            }
        };

        info!(uid = %user.uid, "signed in");
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    async fn signup(&self, email: &str, password: &str) -> Result<User, AuthError> {
        sleep(self.latency).await;
        self.ensure_online()?;

        let email = normalize_email(email);
        check_email(&email)?;
        check_password(password)?;

        let user = {
            let mut accounts = self.accounts.write();
            if accounts.contains_key(&email) {
                return Err(AuthError::EmailInUse);
            }
            let uid = uuid::Uuid::new_v4().simple().to_string();
            accounts.insert(
                email.clone(),
                Account {
                    uid: uid.clone(),
                    password: password.to_string(),
                },
            );
            User { uid, email }
        };

        info!(uid = %user.uid, "account created");
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    async fn logout(&self) -> Result<(), AuthError> {
        sleep(self.latency).await;
        if let Err(e) = self.ensure_online() {
            error!("error signing out: {e}");
            return Err(e);
        }
        self.set_user(None);
        info!("signed out");
        Ok(())
    }
}
