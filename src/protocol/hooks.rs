//! Invocation interceptors.
//!
//! Hooks run before a request is sent or handled and after its response is
//! produced, keyed by the authenticated identity of the connection's peer.
//! Both hooks run in registration order. The server path and the sync client
//! path invoke both automatically; the async client path invokes only the
//! before-hook, leaving the after-hook to the result callback.

use crate::protocol::command::Command;
use std::sync::{Arc, PoisonError, RwLock};

/// An interceptor around request handling and invocation.
pub trait RpcHook: Send + Sync {
    /// Invoked before a request is written or handed to its processor.
    fn before_request(&self, login: &str, request: &Command);

    /// Invoked after a response has been produced.
    fn after_response(&self, login: &str, request: &Command, response: &Command);
}

/// Ordered, mutable list of hooks.
#[derive(Default)]
pub struct HookChain {
    hooks: RwLock<Vec<Arc<dyn RpcHook>>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook. Hooks fire in registration order, for both phases.
    pub fn register(&self, hook: Arc<dyn RpcHook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    pub fn before_request(&self, login: &str, request: &Command) {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook.before_request(login, request);
        }
    }

    pub fn after_response(&self, login: &str, request: &Command, response: &Command) {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook.after_response(login, request, response);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
