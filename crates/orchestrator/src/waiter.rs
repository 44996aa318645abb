//! One-shot dependency barriers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::job::StoreDep;

struct WaiterItem {
    store_name: String,
    block: u64,
    satisfied: AtomicBool,
}

impl fmt::Display for WaiterItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiter (store:{}) (block:{})", self.store_name, self.block)
    }
}

/// A one-shot barrier over a set of `(store, block)` snapshot requirements.
///
/// [`BlockWaiter::signal`] satisfies every item of the named store whose
/// required block is at or below the signalled block; each item transitions
/// at most once.  The barrier resolves when all items are satisfied, an
/// empty barrier immediately.  Waiting is idempotent: every call observes
/// the same completion state.
pub struct BlockWaiter {
    items: Vec<WaiterItem>,
    remaining: AtomicUsize,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl BlockWaiter {
    pub fn new(deps: impl IntoIterator<Item = StoreDep>) -> Self {
        let items: Vec<WaiterItem> = deps
            .into_iter()
            .map(|dep| WaiterItem {
                store_name: dep.store_name,
                block: dep.block,
                satisfied: AtomicBool::new(false),
            })
            .collect();

        let (done_tx, done_rx) = watch::channel(items.is_empty());
        Self {
            remaining: AtomicUsize::new(items.len()),
            items,
            done_tx,
            done_rx,
        }
    }

    /// Marks every item of `store_name` with required block `<= block` as
    /// satisfied.  Lock-free; re-signalling satisfied items is a no-op.
    pub fn signal(&self, store_name: &str, block: u64) {
        for item in &self.items {
            if item.store_name != store_name || item.block > block {
                continue;
            }
            if item.satisfied.swap(true, Ordering::AcqRel) {
                continue;
            }
            if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let _ = self.done_tx.send(true);
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Number of items still tracked by the barrier.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Resolves when every item has been signalled or the token is
    /// cancelled, whichever comes first.
    pub async fn wait(&self, token: &CancellationToken) {
        let mut done = self.done_rx.clone();
        if *done.borrow() {
            return;
        }
        tokio::select! {
            _ = token.cancelled() => {}
            _ = done.wait_for(|resolved| *resolved) => {}
        }
    }
}

impl fmt::Display for BlockWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.items.iter().map(|i| i.to_string()).collect();
        write!(f, "[{}] O({})", items.join(","), self.size())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn make_waiter(deps: &[(&str, u64)]) -> BlockWaiter {
        BlockWaiter::new(
            deps.iter()
                .map(|(store, block)| StoreDep::new(*store, *block)),
        )
    }

    #[tokio::test]
    async fn test_empty_waiter_resolves_immediately() {
        let waiter = make_waiter(&[]);
        assert!(waiter.is_resolved());
        waiter.wait(&CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn test_signal_satisfies_at_or_below_block() {
        let waiter = make_waiter(&[("a", 10), ("a", 20), ("b", 10)]);

        waiter.signal("a", 15);
        assert!(!waiter.is_resolved());

        waiter.signal("a", 20);
        assert!(!waiter.is_resolved());

        waiter.signal("b", 10);
        assert!(waiter.is_resolved());
        waiter.wait(&CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn test_signal_is_idempotent() {
        let waiter = make_waiter(&[("a", 10), ("b", 10)]);
        waiter.signal("a", 10);
        waiter.signal("a", 50);
        waiter.signal("a", 100);
        assert!(!waiter.is_resolved());
        waiter.signal("b", 10);
        assert!(waiter.is_resolved());
    }

    #[tokio::test]
    async fn test_wait_is_idempotent_across_calls() {
        let waiter = make_waiter(&[("a", 10)]);
        waiter.signal("a", 10);
        let token = CancellationToken::new();
        waiter.wait(&token).await;
        waiter.wait(&token).await;
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_wait() {
        let waiter = make_waiter(&[("a", 10)]);
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter.wait(&token))
            .await
            .expect("wait should return on cancellation");
        assert!(!waiter.is_resolved());
    }

    #[tokio::test]
    async fn test_wait_unblocks_on_late_signal() {
        let waiter = std::sync::Arc::new(make_waiter(&[("a", 10)]));
        let token = CancellationToken::new();

        let waiting = {
            let waiter = waiter.clone();
            let token = token.clone();
            tokio::spawn(async move { waiter.wait(&token).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.signal("a", 10);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("wait should resolve")
            .unwrap();
    }
}
