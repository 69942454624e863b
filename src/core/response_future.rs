//! Pending-invocation state: matched with a request, completed at some later
//! point by the response handler, the write-failure path, or the timeout
//! sweep — whichever gets there first.
//!
//! Exactly-once guarantees live here, not in the correlation table: a future
//! completes once, fires its callback once, and releases its admission permit
//! once, no matter how the completion paths race.

use crate::core::admission::ReleaseOnce;
use crate::error::constants;
use crate::protocol::command::{system_code, Command};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::warn;

/// Failure detail delivered to result callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub req_id: i32,
    pub code: i32,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(req_id: i32, code: i32, message: impl Into<String>) -> Self {
        Self {
            req_id,
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "req {} failed with code {}: {}",
            self.req_id, self.code, self.message
        )
    }
}

/// Result callback for async invocations: the response on success, an
/// [`ErrorInfo`] on send failure, admission failure, non-SUCCESS status, or
/// timeout.
pub type ResponseCallback = Box<dyn FnOnce(Result<Command, ErrorInfo>) + Send + 'static>;

/// Result callback for oneway invocations: reports only send success/failure.
pub type SendCallback = Box<dyn FnOnce(Result<(), ErrorInfo>) + Send + 'static>;

#[derive(Default)]
struct FutureState {
    completed: bool,
    response: Option<Command>,
    send_ok: bool,
    cause: Option<String>,
    completed_at: Option<Instant>,
}

/// One in-flight sync or async invocation awaiting its outcome.
pub struct ResponseFuture {
    req_id: i32,
    timeout: Duration,
    created_at: Instant,
    state: Mutex<FutureState>,
    notify: Notify,
    callback: Mutex<Option<ResponseCallback>>,
    permit: ReleaseOnce,
}

impl ResponseFuture {
    pub fn new(
        req_id: i32,
        timeout: Duration,
        callback: Option<ResponseCallback>,
        permit: ReleaseOnce,
    ) -> Self {
        Self {
            req_id,
            timeout,
            created_at: Instant::now(),
            state: Mutex::new(FutureState {
                send_ok: true,
                ..FutureState::default()
            }),
            notify: Notify::new(),
            callback: Mutex::new(callback),
            permit,
        }
    }

    pub fn req_id(&self) -> i32 {
        self.req_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether `created_at + timeout` has passed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.timeout
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FutureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete the future with `response` (`None` means timeout or send
    /// failure). Returns false if it had already completed; the first
    /// completion wins.
    pub fn complete(&self, response: Option<Command>) -> bool {
        {
            let mut state = self.state();
            if state.completed {
                return false;
            }
            state.completed = true;
            state.response = response;
            state.completed_at = Some(Instant::now());
        }
        self.notify.notify_one();
        true
    }

    /// Record the outcome of the transport write.
    pub fn mark_send_ok(&self) {
        self.state().send_ok = true;
    }

    pub fn record_send_failure(&self, cause: impl Into<String>) {
        let mut state = self.state();
        state.send_ok = false;
        state.cause = Some(cause.into());
    }

    pub fn send_ok(&self) -> bool {
        self.state().send_ok
    }

    pub fn cause(&self) -> Option<String> {
        self.state().cause.clone()
    }

    fn response(&self) -> Option<Command> {
        self.state().response.clone()
    }

    /// Suspend the calling task until completion or `timeout`, whichever
    /// comes first, and return the response if one was delivered.
    ///
    /// Intended for a single waiter (the sync invocation path).
    pub async fn wait(&self, timeout: Duration) -> Option<Command> {
        if !self.state().completed {
            let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        }
        self.response()
    }

    /// Round-trip time from creation to completion, if completed.
    pub fn rtt(&self) -> Option<Duration> {
        self.state()
            .completed_at
            .map(|at| at.duration_since(self.created_at))
    }

    pub fn has_callback(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run the result callback, at most once across all callers.
    ///
    /// The outcome handed to the callback is derived from the completion
    /// state: no response means timeout (or send failure, per the recorded
    /// cause); a non-SUCCESS response code is a failure carrying that code.
    /// A panicking callback is contained and logged so permit release can
    /// still happen.
    pub fn execute_callback(&self) {
        let Some(callback) = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let result = {
            let state = self.state();
            match &state.response {
                None => {
                    let message = if state.send_ok {
                        "timeout waiting for response".to_string()
                    } else {
                        state
                            .cause
                            .clone()
                            .unwrap_or_else(|| constants::ERR_WRITE_FAILED.to_string())
                    };
                    Err(ErrorInfo::new(
                        self.req_id,
                        system_code::REQUEST_FAILED,
                        message,
                    ))
                }
                Some(response) if response.code == system_code::SUCCESS => Ok(response.clone()),
                Some(response) => Err(ErrorInfo::new(
                    self.req_id,
                    response.code,
                    response.message.clone().unwrap_or_default(),
                )),
            }
        };

        if catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
            warn!(req_id = self.req_id, "response callback panicked");
        }
    }

    /// Return the admission permit, exactly once.
    pub fn release_permit(&self) {
        self.permit.release();
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("req_id", &self.req_id)
            .field("timeout", &self.timeout)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn first_completion_wins() {
        let future = ResponseFuture::new(1, Duration::from_secs(1), None, ReleaseOnce::disarmed());
        assert!(future.complete(Some(Command::success(1))));
        assert!(!future.complete(None));
        assert!(future.state().response.is_some());
    }

    #[tokio::test]
    async fn wait_returns_delivered_response() {
        let future = Arc::new(ResponseFuture::new(
            9,
            Duration::from_secs(1),
            None,
            ReleaseOnce::disarmed(),
        ));

        let completer = future.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete(Some(Command::success(9)));
        });

        let response = future.wait(Duration::from_millis(500)).await;
        assert_eq!(response.unwrap().req_id, 9);
    }

    #[tokio::test]
    async fn wait_handles_completion_before_wait() {
        let future = ResponseFuture::new(2, Duration::from_secs(1), None, ReleaseOnce::disarmed());
        future.complete(Some(Command::success(2)));
        assert!(future.wait(Duration::from_millis(10)).await.is_some());
    }

    #[tokio::test]
    async fn wait_times_out_without_completion() {
        let future = ResponseFuture::new(3, Duration::from_secs(1), None, ReleaseOnce::disarmed());
        let started = Instant::now();
        assert!(future.wait(Duration::from_millis(30)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn callback_runs_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let future = ResponseFuture::new(
            4,
            Duration::from_secs(1),
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ReleaseOnce::disarmed(),
        );

        future.complete(None);
        future.execute_callback();
        future.execute_callback();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_sees_failure_code_from_response() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let future = ResponseFuture::new(
            5,
            Duration::from_secs(1),
            Some(Box::new(move |result| {
                *sink.lock().unwrap() = Some(result);
            })),
            ReleaseOnce::disarmed(),
        );

        future.complete(Some(Command::failure(5, system_code::SYSTEM_BUSY, "busy")));
        future.execute_callback();

        let result = seen.lock().unwrap().take().unwrap();
        let error = result.unwrap_err();
        assert_eq!(error.code, system_code::SYSTEM_BUSY);
        assert_eq!(error.req_id, 5);
    }

    #[test]
    fn send_failure_cause_reaches_callback() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let future = ResponseFuture::new(
            6,
            Duration::from_secs(1),
            Some(Box::new(move |result| {
                *sink.lock().unwrap() = Some(result);
            })),
            ReleaseOnce::disarmed(),
        );

        future.record_send_failure("broken pipe");
        future.complete(None);
        future.execute_callback();

        let result = seen.lock().unwrap().take().unwrap();
        let error = result.unwrap_err();
        assert_eq!(error.code, system_code::REQUEST_FAILED);
        assert!(error.message.contains("broken pipe"));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let future = ResponseFuture::new(
            7,
            Duration::from_secs(1),
            Some(Box::new(|_| panic!("misbehaving callback"))),
            ReleaseOnce::disarmed(),
        );
        future.complete(None);
        future.execute_callback();
    }
}
