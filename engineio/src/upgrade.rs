//! Upgrade coordinator state machine: `none -> initiated -> probed ->
//! (complete = none)`. Owned and guarded by the session; never mutated
//! except through `mark_initiated` / `mark_probed` / `reset`.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::transport::TransportHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStatus {
    None,
    Initiated,
    Probed,
}

pub struct UpgradeState {
    status: UpgradeStatus,
    probe: Option<TransportHandle>,
    timer: Option<JoinHandle<()>>,
}

impl Default for UpgradeState {
    fn default() -> Self {
        Self {
            status: UpgradeStatus::None,
            probe: None,
            timer: None,
        }
    }
}

impl UpgradeState {
    pub fn status(&self) -> UpgradeStatus {
        self.status
    }

    pub fn is_upgrading(&self) -> bool {
        self.status != UpgradeStatus::None
    }

    pub fn probe(&self) -> Option<&TransportHandle> {
        self.probe.as_ref()
    }

    /// `none -> initiated`. Arms the upgrade timeout timer; on expiry
    /// `on_timeout` is invoked and should dispose the probe and reset.
    pub fn mark_initiated<F>(&mut self, probe: TransportHandle, timeout: Duration, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel_timer();
        self.status = UpgradeStatus::Initiated;
        self.probe = Some(probe);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_timeout();
        }));
    }

    /// `initiated -> probed`.
    pub fn mark_probed(&mut self) {
        self.status = UpgradeStatus::Probed;
    }

    /// `probed -> none`, also cancelling the timeout timer. Returns the
    /// probe transport so the caller can splice it in as current.
    pub fn mark_complete(&mut self) -> Option<TransportHandle> {
        self.cancel_timer();
        self.status = UpgradeStatus::None;
        self.probe.take()
    }

    /// Returns to `none` without completing (timeout, dispose, or
    /// cancellation). Returns the probe transport, if any, for disposal.
    pub fn reset(&mut self) -> Option<TransportHandle> {
        self.cancel_timer();
        self.status = UpgradeStatus::None;
        self.probe.take()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for UpgradeState {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
