//! Request dispatch routing.
//!
//! Maps inbound request codes to a (processor, executor) pair, with a
//! distinguished default entry catching unmatched codes. The registry only
//! routes; the processing pipeline around it (admission checks, hooks,
//! response writing) lives in [`crate::core::remoting`].

use crate::core::executor::TaskExecutor;
use crate::error::Result;
use crate::protocol::command::Command;
use crate::transport::connection::Connection;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Application-supplied handler for one request code (or the default).
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    /// A handler-level admission check; returning true answers the request
    /// with COMMAND_NOT_AVAILABLE_NOW without consuming an executor slot.
    fn reject(&self) -> bool {
        false
    }

    /// Handle one request. Returning `Ok(None)` produces no response frame;
    /// an error becomes a SYSTEM_ERROR response (unless the request was
    /// oneway).
    async fn process(&self, conn: &Arc<Connection>, request: &Command) -> Result<Option<Command>>;
}

/// One routing entry: the processor and the executor its work runs on.
#[derive(Clone)]
pub struct ProcessorEntry {
    pub processor: Arc<dyn RequestProcessor>,
    pub executor: TaskExecutor,
}

/// code -> (processor, executor) table plus the default entry.
#[derive(Default)]
pub struct ProcessorRegistry {
    table: RwLock<HashMap<i32, ProcessorEntry>>,
    default: RwLock<Option<ProcessorEntry>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        request_code: i32,
        executor: TaskExecutor,
        processor: Arc<dyn RequestProcessor>,
    ) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                request_code,
                ProcessorEntry {
                    processor,
                    executor,
                },
            );
    }

    pub fn register_default(&self, executor: TaskExecutor, processor: Arc<dyn RequestProcessor>) {
        *self
            .default
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(ProcessorEntry {
            processor,
            executor,
        });
    }

    /// Resolve a request code, falling back to the default entry.
    pub fn resolve(&self, request_code: i32) -> Option<ProcessorEntry> {
        let matched = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request_code)
            .cloned();
        matched.or_else(|| {
            self.default
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }
}
