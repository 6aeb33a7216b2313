//! Lifetime handle for work started on behalf of a view.
//!
//! The view owns a [`LifetimeGuard`]; fetches hold a cloned [`Lifetime`].
//! Ending the guard (or dropping it) tells every holder to stop writing.

use tokio::sync::watch;

#[derive(Debug)]
pub struct LifetimeGuard {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct Lifetime {
    rx: Option<watch::Receiver<bool>>,
}

impl LifetimeGuard {
    pub fn new() -> (Self, Lifetime) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Lifetime { rx: Some(rx) })
    }

    pub fn end(&self) {
        self.tx.send_replace(true);
    }
}

impl Drop for LifetimeGuard {
    fn drop(&mut self) {
        self.end();
    }
}

impl Lifetime {
    /// Never ends. For callers that are not tied to a view.
    pub fn detached() -> Self {
        Self { rx: None }
    }

    pub fn is_ended(&self) -> bool {
        match &self.rx {
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
            None => false,
        }
    }

    /// Resolves once the owning guard ends or is dropped.
    pub async fn ended(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        // wait_for returns Err when the sender is gone, which also counts as ended.
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn end_is_observed() {
        let (guard, life) = LifetimeGuard::new();
        assert!(!life.is_ended());
        guard.end();
        assert!(life.is_ended());
        tokio::time::timeout(Duration::from_millis(100), life.ended())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn drop_ends() {
        let (guard, life) = LifetimeGuard::new();
        drop(guard);
        assert!(life.is_ended());
        tokio::time::timeout(Duration::from_millis(100), life.ended())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn detached_never_ends() {
        let life = Lifetime::detached();
        assert!(!life.is_ended());
        let res = tokio::time::timeout(Duration::from_millis(20), life.ended()).await;
        assert!(res.is_err());
    }
}
