use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use strum::{Display, FromRepr};

/// Phase of the reporting thread. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum LoopState {
    Starting = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

/// State shared by the reporting thread, the host's hooks and the
/// producer's delivery callbacks.
#[derive(Debug)]
pub struct ReporterState {
    shutdown: AtomicBool,
    loop_state: AtomicU8,
    last_report_ms: AtomicI64,
    send_failures: AtomicU64,
}

impl ReporterState {
    pub fn new(last_report_ms: i64) -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            loop_state: AtomicU8::new(LoopState::Starting as u8),
            last_report_ms: AtomicI64::new(last_report_ms),
            send_failures: AtomicU64::new(0),
        }
    }

    /// Set the shutdown flag. Returns `true` only for the call that set it.
    pub fn request_shutdown(&self) -> bool {
        !self.shutdown.swap(true, Ordering::AcqRel)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn loop_state(&self) -> LoopState {
        LoopState::from_repr(self.loop_state.load(Ordering::Acquire)).unwrap_or(LoopState::Stopped)
    }

    /// Move to `next` unless already at or past it.
    pub fn advance(&self, next: LoopState) -> bool {
        self.loop_state.fetch_max(next as u8, Ordering::AcqRel) < next as u8
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn reset_send_failures(&self) {
        self.send_failures.store(0, Ordering::Relaxed);
    }

    pub fn last_report_ms(&self) -> i64 {
        self.last_report_ms.load(Ordering::Acquire)
    }

    pub fn set_last_report_ms(&self, time_ms: i64) {
        self.last_report_ms.store(time_ms, Ordering::Release);
    }
}

/// Wall clock time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_is_set_once() {
        let state = ReporterState::new(0);
        assert!(!state.is_shutdown());
        assert!(state.request_shutdown());
        assert!(!state.request_shutdown());
        assert!(state.is_shutdown());
    }

    #[test]
    fn test_loop_state_only_moves_forward() {
        let state = ReporterState::new(0);
        assert_eq!(state.loop_state(), LoopState::Starting);
        assert!(state.advance(LoopState::Running));
        assert!(state.advance(LoopState::Stopped));
        assert!(!state.advance(LoopState::ShuttingDown));
        assert_eq!(state.loop_state(), LoopState::Stopped);
    }

    #[test]
    fn test_failure_counter() {
        let state = ReporterState::new(0);
        state.record_send_failure();
        state.record_send_failure();
        assert_eq!(state.send_failures(), 2);
        state.reset_send_failures();
        assert_eq!(state.send_failures(), 0);
    }
}
