//! One-shot values that many tasks can wait on.

use tokio::sync::watch;

/// Create a linked resolver/waiter pair.
pub fn deferred<T: Clone>() -> (Resolver<T>, Waiter<T>) {
    let (tx, rx) = watch::channel(None);
    (Resolver { tx }, Waiter { rx })
}

/// Write side of a deferred value. Only the first resolution sticks.
#[derive(Debug)]
pub struct Resolver<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Resolver<T> {
    /// Resolve with `value`. Returns false if already resolved.
    pub fn resolve(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn waiter(&self) -> Waiter<T> {
        Waiter {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of a deferred value. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Waiter<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Waiter<T> {
    /// The value, if already resolved.
    pub fn peek(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Wait for resolution. Pends forever if the resolver is dropped unresolved.
    pub async fn wait(&self) -> T {
        let mut rx = self.rx.clone();
        let resolved = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        match resolved {
            Some(value) => value,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_once() {
        let (resolver, waiter) = deferred::<u32>();
        assert!(waiter.peek().is_none());
        assert!(resolver.resolve(1));
        assert!(!resolver.resolve(2));
        assert_eq!(waiter.wait().await, 1);
        assert!(resolver.is_resolved());
    }

    #[tokio::test]
    async fn test_many_awaiters() {
        let (resolver, waiter) = deferred::<String>();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let waiter = waiter.clone();
                tokio::spawn(async move { waiter.wait().await })
            })
            .collect();
        tokio::task::yield_now().await;
        resolver.resolve("ready".to_string());
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "ready");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_resolver_pends() {
        let (resolver, waiter) = deferred::<u32>();
        drop(resolver);
        let result = tokio::time::timeout(Duration::from_secs(5), waiter.wait()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_waiter_from_resolver_sees_value() {
        let (resolver, _waiter) = deferred::<u32>();
        resolver.resolve(7);
        assert_eq!(resolver.waiter().wait().await, 7);
    }
}
