// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cooperative cancellation shared by a task, its turn, and its tools.
//!
//! One watch channel per task: the handle side lives with whoever owns the
//! task (the executor's interrupt path), the flag side is cloned into every
//! suspension point.  A dropped handle counts as cancellation so teardown
//! paths cannot strand a waiting tool.

use tokio::sync::watch;

pub fn cancel_pair() -> (CancelHandle, CancelFlag) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelFlag { rx })
}

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn flag(&self) -> CancelFlag {
        CancelFlag { rx: self.tx.subscribe() }
    }
}

#[derive(Debug, Clone)]
pub struct CancelFlag {
    rx: watch::Receiver<bool>,
}

impl CancelFlag {
    /// A flag that never fires, for contexts without a running task.
    pub fn inert() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel never closes.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is requested (or the handle is gone).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        loop {
            match rx.changed().await {
                Ok(()) => {
                    if *rx.borrow() {
                        return;
                    }
                }
                // Sender dropped: treat as cancelled.
                Err(_) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_resolves_waiters() {
        let (handle, flag) = cancel_pair();
        assert!(!flag.is_cancelled());
        let waiter = tokio::spawn({
            let flag = flag.clone();
            async move { flag.cancelled().await }
        });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter resolves")
            .unwrap();
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_counts_as_cancelled() {
        let (handle, flag) = cancel_pair();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), flag.cancelled())
            .await
            .expect("drop resolves waiters");
    }

    #[tokio::test]
    async fn inert_flag_never_fires() {
        let flag = CancelFlag::inert();
        assert!(!flag.is_cancelled());
        let timeout =
            tokio::time::timeout(Duration::from_millis(50), flag.cancelled()).await;
        assert!(timeout.is_err(), "inert flag must not resolve");
    }
}
