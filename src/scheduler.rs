//! Poll scheduling.
//! An explicit two-state timer: `Idle` (no deadline pending) or `Scheduled`
//! (exactly one deadline pending). Arming replaces any pending deadline, so
//! there is a single re-arm operation instead of cancel/reschedule pairs
//! scattered across call sites.

use std::pin::Pin;
use tokio::time::{Duration, Sleep, sleep};

enum TimerState {
    Idle,
    Scheduled(Pin<Box<Sleep>>),
}

pub(crate) struct PollTimer {
    state: TimerState,
}

impl PollTimer {
    pub(crate) fn idle() -> Self {
        Self {
            state: TimerState::Idle,
        }
    }

    /// Schedule the next fire `delay` from now, cancelling any pending
    /// deadline. This is the only re-arm path.
    pub(crate) fn arm(&mut self, delay: Duration) {
        self.state = TimerState::Scheduled(Box::pin(sleep(delay)));
    }

    /// Wait for the pending deadline; pending forever while idle so it can
    /// sit in a `select!` beside a command channel. Fires once, then the
    /// timer is idle until re-armed.
    pub(crate) async fn fired(&mut self) {
        match &mut self.state {
            TimerState::Idle => std::future::pending::<()>().await,
            TimerState::Scheduled(deadline) => {
                deadline.as_mut().await;
                self.state = TimerState::Idle;
            }
        }
    }
}
