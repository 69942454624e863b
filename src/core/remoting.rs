//! The invocation engine shared by server and client roles.
//!
//! Owns the correlation table, the two admission gates, the processor
//! registry, and the hook chain, and implements the three invocation styles
//! plus inbound message processing. The timeout reaper periodically sweeps
//! the correlation table so async calls whose peer never answers are still
//! resolved through their failure callback.
//!
//! The invocation entry points and the request-processing entry point carry
//! `#[instrument]` spans; an external tracing layer observes them without
//! altering control flow.

use crate::core::admission::{AdmissionGate, ReleaseOnce};
use crate::core::executor::TaskExecutor;
use crate::core::response_future::{ErrorInfo, ResponseFuture};
use crate::error::{constants, RemotingError, Result};
use crate::protocol::command::{system_code, Command};
use crate::protocol::dispatcher::{ProcessorEntry, ProcessorRegistry, RequestProcessor};
use crate::protocol::hooks::{HookChain, RpcHook};
use crate::transport::connection::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, instrument, warn};

/// Minimum spacing between SYSTEM_BUSY log lines, to avoid log storms when an
/// executor stays saturated.
const BUSY_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// The correlation table: in-flight request id -> pending outcome. Shared
/// with write-completion listeners and the reaper task.
type ResponseTable = Arc<Mutex<HashMap<i32, Arc<ResponseFuture>>>>;

/// Request/response correlation and dispatch engine.
pub struct RemotingEngine {
    gate_async: AdmissionGate,
    gate_oneway: AdmissionGate,
    response_table: ResponseTable,
    processors: ProcessorRegistry,
    hooks: Arc<HookChain>,
    callback_executor: Option<TaskExecutor>,
    busy_logged_at: Mutex<Option<Instant>>,
}

impl RemotingEngine {
    pub fn new(
        async_permits: usize,
        oneway_permits: usize,
        callback_executor: Option<TaskExecutor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gate_async: AdmissionGate::new(async_permits),
            gate_oneway: AdmissionGate::new(oneway_permits),
            response_table: Arc::new(Mutex::new(HashMap::new())),
            processors: ProcessorRegistry::new(),
            hooks: Arc::new(HookChain::new()),
            callback_executor,
            busy_logged_at: Mutex::new(None),
        })
    }

    pub fn register_processor(
        &self,
        request_code: i32,
        executor: TaskExecutor,
        processor: Arc<dyn RequestProcessor>,
    ) {
        self.processors.register(request_code, executor, processor);
    }

    pub fn register_default_processor(
        &self,
        executor: TaskExecutor,
        processor: Arc<dyn RequestProcessor>,
    ) {
        self.processors.register_default(executor, processor);
    }

    pub fn register_hook(&self, hook: Arc<dyn RpcHook>) {
        self.hooks.register(hook);
    }

    fn table(&self) -> MutexGuard<'_, HashMap<i32, Arc<ResponseFuture>>> {
        lock_table(&self.response_table)
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.table().len()
    }

    /// Synchronous invocation: suspends the caller until the response
    /// arrives or `timeout` passes.
    #[instrument(skip(self, conn, request), fields(req_id = request.req_id, code = request.code))]
    pub async fn invoke_sync(
        &self,
        conn: &Arc<Connection>,
        request: Command,
        timeout: Duration,
    ) -> Result<Command> {
        if !conn.is_active() {
            return Err(RemotingError::Connect(
                constants::ERR_CONNECTION_INACTIVE.to_string(),
            ));
        }

        let req_id = request.req_id;
        let future = Arc::new(ResponseFuture::new(
            req_id,
            timeout,
            None,
            ReleaseOnce::disarmed(),
        ));
        self.table().insert(req_id, future.clone());

        let login = conn.login();
        self.hooks.before_request(&login, &request);

        let ack = conn.write(request.clone());
        {
            let future = future.clone();
            tokio::spawn(async move {
                match ack.await {
                    Ok(Ok(())) => future.mark_send_ok(),
                    Ok(Err(e)) => {
                        future.record_send_failure(e.to_string());
                        future.complete(None);
                    }
                    Err(_) => {
                        future.record_send_failure(constants::ERR_WRITER_GONE);
                        future.complete(None);
                    }
                }
            });
        }

        let response = future.wait(timeout).await;
        self.table().remove(&req_id);

        match response {
            Some(response) => {
                self.hooks.after_response(&login, &request, &response);
                debug!(req_id, rtt = ?future.rtt(), "returning response");
                Ok(response)
            }
            None if future.send_ok() => Err(RemotingError::Timeout(timeout)),
            None => Err(RemotingError::Send(
                future
                    .cause()
                    .unwrap_or_else(|| constants::ERR_WRITE_FAILED.to_string()),
            )),
        }
    }

    /// Asynchronous invocation: the outcome, including every failure mode,
    /// is delivered through `callback`, exactly once.
    #[instrument(skip(self, conn, request, callback), fields(req_id = request.req_id, code = request.code))]
    pub async fn invoke_async<F>(
        &self,
        conn: &Arc<Connection>,
        request: Command,
        timeout: Duration,
        callback: F,
    ) where
        F: FnOnce(std::result::Result<Command, ErrorInfo>) + Send + 'static,
    {
        let req_id = request.req_id;

        if !conn.is_active() {
            callback(Err(ErrorInfo::new(
                req_id,
                system_code::REQUEST_FAILED,
                constants::ERR_CONNECTION_INACTIVE,
            )));
            return;
        }

        let permit = match self.gate_async.try_acquire(timeout).await {
            Ok(permit) => permit,
            Err(e) => {
                callback(Err(ErrorInfo::new(
                    req_id,
                    system_code::REQUEST_FAILED,
                    e.to_string(),
                )));
                return;
            }
        };

        let future = Arc::new(ResponseFuture::new(
            req_id,
            timeout,
            Some(Box::new(callback)),
            ReleaseOnce::new(permit),
        ));
        self.table().insert(req_id, future.clone());

        self.hooks.before_request(&conn.login(), &request);

        let ack = conn.write(request);
        let table = self.response_table.clone();
        let callback_executor = self.callback_executor.clone();
        tokio::spawn(async move {
            match ack.await {
                Ok(Ok(())) => future.mark_send_ok(),
                Ok(Err(e)) => {
                    fail_send(&table, callback_executor.as_ref(), &future, e.to_string());
                }
                Err(_) => fail_send(
                    &table,
                    callback_executor.as_ref(),
                    &future,
                    constants::ERR_WRITER_GONE.to_string(),
                ),
            }
        });
    }

    /// Fire-and-forget invocation: no correlation entry is created and
    /// `callback` reports only send success/failure.
    #[instrument(skip(self, conn, request, callback), fields(req_id = request.req_id, code = request.code))]
    pub async fn invoke_oneway<F>(
        &self,
        conn: &Arc<Connection>,
        mut request: Command,
        timeout: Duration,
        callback: F,
    ) where
        F: FnOnce(std::result::Result<(), ErrorInfo>) + Send + 'static,
    {
        request.mark_oneway();
        let req_id = request.req_id;

        if !conn.is_active() {
            callback(Err(ErrorInfo::new(
                req_id,
                system_code::REQUEST_FAILED,
                constants::ERR_CONNECTION_INACTIVE,
            )));
            return;
        }

        let permit = match self.gate_oneway.try_acquire(timeout).await {
            Ok(permit) => permit,
            Err(e) => {
                callback(Err(ErrorInfo::new(
                    req_id,
                    system_code::REQUEST_FAILED,
                    e.to_string(),
                )));
                return;
            }
        };
        let release = ReleaseOnce::new(permit);

        self.hooks.before_request(&conn.login(), &request);

        let ack = conn.write(request);
        tokio::spawn(async move {
            let outcome = match ack.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ErrorInfo::new(
                    req_id,
                    system_code::REQUEST_FAILED,
                    e.to_string(),
                )),
                Err(_) => Err(ErrorInfo::new(
                    req_id,
                    system_code::REQUEST_FAILED,
                    constants::ERR_WRITER_GONE,
                )),
            };
            release.release();
            if let Err(ref error) = outcome {
                warn!(%error, "oneway send failed");
            }
            callback(outcome);
        });
    }

    /// Route one inbound command to the correlation table (responses) or the
    /// dispatch pipeline (requests and oneways).
    pub async fn process_message(&self, conn: &Arc<Connection>, command: Command) {
        if command.is_response() {
            self.process_response(command);
        } else {
            self.process_request(conn, command).await;
        }
    }

    #[instrument(skip(self, conn, request), fields(req_id = request.req_id, code = request.code))]
    async fn process_request(&self, conn: &Arc<Connection>, request: Command) {
        // Keep copies in case the processor mutates its view of the request.
        let req_id = request.req_id;
        let oneway = request.is_oneway();

        let Some(entry) = self.processors.resolve(request.code) else {
            if !oneway {
                conn.send(Command::failure(
                    req_id,
                    system_code::REQUEST_CODE_NOT_SUPPORTED,
                    format!("request code {} not supported", request.code),
                ));
            }
            return;
        };
        let ProcessorEntry {
            processor,
            executor,
        } = entry;

        if processor.reject() {
            if !oneway {
                conn.send(Command::failure(
                    req_id,
                    system_code::COMMAND_NOT_AVAILABLE_NOW,
                    "this command is currently unavailable",
                ));
            }
            return;
        }

        let hooks = self.hooks.clone();
        let task_conn = conn.clone();
        let task = async move {
            let login = task_conn.login();
            hooks.before_request(&login, &request);

            match processor.process(&task_conn, &request).await {
                Ok(Some(mut response)) => {
                    hooks.after_response(&login, &request, &response);
                    if !oneway {
                        response.req_id = req_id;
                        response.mark_response();
                        task_conn.send(response);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, command = ?request, "process request failed");
                    if !oneway {
                        task_conn.send(Command::failure(
                            req_id,
                            system_code::SYSTEM_ERROR,
                            e.to_string(),
                        ));
                    }
                }
            }
        };

        if executor.try_spawn(task).is_err() {
            self.log_system_busy();
            if !oneway {
                conn.send(Command::failure(
                    req_id,
                    system_code::SYSTEM_BUSY,
                    "[OVERLOAD] system busy, try later",
                ));
            }
        }
    }

    fn process_response(&self, response: Command) {
        let req_id = response.req_id;
        let future = self.table().remove(&req_id);
        match future {
            Some(future) => {
                future.complete(Some(response));
                run_callback(self.callback_executor.as_ref(), &future);
                future.release_permit();
            }
            None => {
                warn!(req_id, "received response matching no pending request, discarding");
            }
        }
    }

    /// Sweep the correlation table, resolving every entry whose deadline has
    /// passed with a timeout outcome.
    pub fn scan_response_table(&self) {
        sweep_expired(&self.response_table, self.callback_executor.as_ref());
    }

    /// Start the periodic reaper. The task holds only a weak reference to
    /// the correlation table and exits when the engine is dropped.
    pub fn spawn_reaper(&self, period: Duration) -> JoinHandle<()> {
        let table = Arc::downgrade(&self.response_table);
        let callback_executor = self.callback_executor.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(table) = table.upgrade() else { break };
                sweep_expired(&table, callback_executor.as_ref());
            }
        })
    }

    fn log_system_busy(&self) {
        let mut logged_at = self
            .busy_logged_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if logged_at.map_or(true, |at| now.duration_since(at) >= BUSY_LOG_INTERVAL) {
            *logged_at = Some(now);
            warn!("processor executor saturated, answering SYSTEM_BUSY");
        }
    }
}

fn lock_table(table: &ResponseTable) -> MutexGuard<'_, HashMap<i32, Arc<ResponseFuture>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a future's callback, preferring the callback executor and falling
/// back to the current task when it is absent or saturated so the outcome is
/// always delivered. Permit release unconditionally follows the callback.
fn run_callback(executor: Option<&TaskExecutor>, future: &Arc<ResponseFuture>) {
    if !future.has_callback() {
        return;
    }
    debug!(req_id = future.req_id(), rtt = ?future.rtt(), "executing response callback");

    let submitted = match executor {
        Some(executor) => {
            let future = future.clone();
            executor
                .try_spawn(async move {
                    future.execute_callback();
                    future.release_permit();
                })
                .is_ok()
        }
        None => false,
    };

    if !submitted {
        future.execute_callback();
        future.release_permit();
    }
}

/// A send failure observed from the write-completion notification: remove
/// the entry and fire the failure callback immediately.
fn fail_send(
    table: &ResponseTable,
    executor: Option<&TaskExecutor>,
    future: &Arc<ResponseFuture>,
    cause: String,
) {
    warn!(req_id = future.req_id(), cause = %cause, "send of request failed");
    lock_table(table).remove(&future.req_id());
    future.record_send_failure(cause);
    future.complete(None);
    run_callback(executor, future);
}

fn sweep_expired(table: &ResponseTable, executor: Option<&TaskExecutor>) {
    let now = Instant::now();
    let expired: Vec<Arc<ResponseFuture>> = {
        let mut table = lock_table(table);
        let expired_ids: Vec<i32> = table
            .iter()
            .filter(|(_, future)| future.is_expired(now))
            .map(|(req_id, _)| *req_id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|req_id| table.remove(&req_id))
            .collect()
    };

    for future in expired {
        warn!(req_id = future.req_id(), "removing timed out request");
        future.release_permit();
        future.complete(None);
        run_callback(executor, &future);
    }
}
