use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::ui::{UiEvent, UiSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshTarget {
    Clock,
    Weather,
    /// Calendar events and tasks.
    Data,
}

impl RefreshTarget {
    pub const ALL: [RefreshTarget; 3] = [
        RefreshTarget::Clock,
        RefreshTarget::Weather,
        RefreshTarget::Data,
    ];

    pub const fn period(self) -> Duration {
        match self {
            RefreshTarget::Clock => Duration::from_secs(60),
            RefreshTarget::Weather => Duration::from_secs(30 * 60),
            RefreshTarget::Data => Duration::from_secs(5 * 60),
        }
    }
}

/// Periodic refresh loops. Each target ticks on its own period until
/// [`AutoRefresh::stop`] or drop.
#[derive(Debug)]
pub struct AutoRefresh {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl AutoRefresh {
    pub fn start(ui: Arc<dyn UiSink>, targets: &[RefreshTarget]) -> Self {
        let cancel = CancellationToken::new();
        let handles = targets
            .iter()
            .map(|&target| tokio::spawn(tick(ui.clone(), target, cancel.child_token())))
            .collect();
        Self { cancel, handles }
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick(ui: Arc<dyn UiSink>, target: RefreshTarget, cancel: CancellationToken) {
    let period = target.period();
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?target, ?period, "auto refresh started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(?target, "auto refresh stopped");
                return;
            }
            _ = interval.tick() => {
                trace!(?target, "refresh tick");
                ui.emit(UiEvent::Refresh(target));
            }
        }
    }
}
