//! Completion events.
//!
//! An event tracks a group of commands on one queue. Commands attach to the
//! event as they are enqueued; once the submitter closes the event, it turns
//! terminal when the last attached command finishes. The first failing
//! command marks the event failed and the remaining ones are skipped.

use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "async")]
use std::task::Waker;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Enqueued, not yet picked up by the device.
    Queued,
    /// At least one attached command has started.
    Running,
    Complete,
    Failed,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Failed)
    }
}

struct EventState {
    status: EventStatus,
    pending: usize,
    closed: bool,
    error: Option<String>,
    #[cfg(feature = "async")]
    wakers: Vec<Waker>,
}

struct EventInner {
    id: u64,
    state: Mutex<EventState>,
    signal: Condvar,
    metrics: Option<Arc<Metrics>>,
}

/// Shared handle to a device-side completion signal.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new() -> Self {
        Self::with_metrics(None)
    }

    /// Event whose terminal transition is counted as a task outcome.
    pub(crate) fn for_task(metrics: Arc<Metrics>) -> Self {
        Self::with_metrics(Some(metrics))
    }

    fn with_metrics(metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(EventState {
                    status: EventStatus::Queued,
                    pending: 0,
                    closed: false,
                    error: None,
                    #[cfg(feature = "async")]
                    wakers: Vec::new(),
                }),
                signal: Condvar::new(),
                metrics,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn attach(&self) {
        self.inner.state.lock().pending += 1;
    }

    /// No further commands will attach.
    pub(crate) fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        self.settle(&mut state);
    }

    /// Called by the device before running an attached command. Returns
    /// `false` when an earlier command already failed.
    pub(crate) fn begin(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.error.is_some() {
            return false;
        }
        if state.status == EventStatus::Queued {
            state.status = EventStatus::Running;
        }
        true
    }

    pub(crate) fn command_done(&self) {
        let mut state = self.inner.state.lock();
        state.pending = state.pending.saturating_sub(1);
        self.settle(&mut state);
    }

    pub(crate) fn command_failed<S: Into<String>>(&self, msg: S) {
        let mut state = self.inner.state.lock();
        if state.error.is_none() {
            state.error = Some(msg.into());
        }
        state.pending = state.pending.saturating_sub(1);
        self.settle(&mut state);
    }

    fn settle(&self, state: &mut EventState) {
        if !state.closed || state.pending > 0 || state.status.is_terminal() {
            return;
        }

        state.status = if state.error.is_some() {
            EventStatus::Failed
        } else {
            EventStatus::Complete
        };

        if let Some(metrics) = &self.inner.metrics {
            match state.status {
                EventStatus::Failed => metrics.record_task_failed(),
                _ => metrics.record_task_completed(),
            }
        }

        #[cfg(feature = "async")]
        for waker in state.wakers.drain(..) {
            waker.wake();
        }

        self.inner.signal.notify_all();
    }

    pub fn status(&self) -> EventStatus {
        self.inner.state.lock().status
    }

    pub fn is_complete(&self) -> bool {
        self.status().is_terminal()
    }

    /// Failure message of a failed event.
    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    /// Block until the event is terminal.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            self.inner.signal.wait(&mut state);
        }
        Self::outcome(&state)
    }

    /// Block for at most `timeout`. Returns whether the event is terminal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            if self.inner.signal.wait_until(&mut state, deadline).timed_out() {
                return state.status.is_terminal();
            }
        }
        true
    }

    pub(crate) fn result(&self) -> Option<Result<()>> {
        let state = self.inner.state.lock();
        if state.status.is_terminal() {
            Some(Self::outcome(&state))
        } else {
            None
        }
    }

    fn outcome(state: &EventState) -> Result<()> {
        match &state.error {
            Some(msg) => Err(Error::execution(msg.clone())),
            None => Ok(()),
        }
    }

    /// Store `waker` to be woken on the terminal transition. Returns `true`
    /// if the event is already terminal and nothing was stored.
    #[cfg(feature = "async")]
    pub(crate) fn register_waker(&self, waker: &Waker) -> bool {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            return true;
        }
        if !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }
        false
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_not_terminal_until_closed() {
        let event = Event::new();
        event.attach();
        assert!(event.begin());
        event.command_done();
        assert_eq!(event.status(), EventStatus::Running);

        event.close();
        assert_eq!(event.status(), EventStatus::Complete);
        assert!(event.wait().is_ok());
    }

    #[test]
    fn test_close_without_commands_completes() {
        let event = Event::new();
        event.close();
        assert!(event.is_complete());
    }

    #[test]
    fn test_failure_skips_remaining_commands() {
        let event = Event::new();
        event.attach();
        event.attach();
        event.close();

        assert!(event.begin());
        event.command_failed("kernel panicked");
        assert!(!event.begin());
        event.command_done();

        assert_eq!(event.status(), EventStatus::Failed);
        let err = event.wait().unwrap_err();
        assert!(err.to_string().contains("kernel panicked"));
    }

    #[test]
    fn test_wait_across_threads() {
        let event = Event::new();
        event.attach();
        event.close();

        let device = {
            let event = event.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                event.begin();
                event.command_done();
            })
        };

        event.wait().unwrap();
        device.join().unwrap();
        assert!(event.is_complete());
    }

    #[test]
    fn test_wait_timeout() {
        let event = Event::new();
        event.attach();
        event.close();
        assert!(!event.wait_timeout(Duration::from_millis(20)));

        event.command_done();
        assert!(event.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_task_outcome_is_counted_once() {
        let metrics = Arc::new(Metrics::new());
        let event = Event::for_task(Arc::clone(&metrics));
        event.attach();
        event.close();
        event.command_done();
        event.command_done();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_failed, 0);
    }
}
