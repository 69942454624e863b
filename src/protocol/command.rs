//! # Command Model
//!
//! The wire message exchanged between peers: a request, a response, or a
//! fire-and-forget (oneway) request, distinguished by the flag bitset.
//!
//! Request ids come from a single process-wide counter shared by every
//! outbound request; it starts at zero and wraps on overflow. Collisions are
//! accepted as negligible because correlation entries are short-lived
//! relative to the wrap period.

use crate::config::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

/// Status and request code space shared by both directions of the channel.
pub mod system_code {
    /// Request code of the authentication handshake (login)
    pub const AUTHENTICATION: i32 = 0;

    /// Usually a local network error on the calling side
    pub const REQUEST_FAILED: i32 = -1;

    pub const SUCCESS: i32 = 0;

    /// Server-side common error coding
    pub const SYSTEM_ERROR: i32 = 1;

    /// Server load is too high
    pub const SYSTEM_BUSY: i32 = 2;

    /// Command is not available now
    pub const COMMAND_NOT_AVAILABLE_NOW: i32 = 3;

    /// Request code not supported
    pub const REQUEST_CODE_NOT_SUPPORTED: i32 = 4;

    /// Unauthorized
    pub const UNAUTHORIZED: i32 = 5;
}

/// Flag bit marking a command as a response
const FLAG_RESPONSE: u8 = 0x01;

/// Flag bit marking a command as a oneway request
const FLAG_ONEWAY: u8 = 0x02;

static REQUEST_ID: AtomicI32 = AtomicI32::new(0);

/// Allocate the next request id from the shared sequence. Wraps on overflow.
pub fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A single protocol message.
///
/// `body` and `ext_fields` are optional; absent is distinct from empty on the
/// wire. `message` carries human-readable text on failure responses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Command {
    pub version: u8,

    /// Correlates a response with its originating request
    pub req_id: i32,

    /// RESPONSE / ONEWAY bitset; neither bit set means REQUEST
    pub flag: u8,

    /// Requested operation, or a status code on responses
    pub code: i32,

    /// Human-readable text, usually describing a failure
    pub message: Option<String>,

    /// Opaque application payload
    pub body: Option<Vec<u8>>,

    /// Cross-cutting metadata passed through untouched, e.g. a trace id
    pub ext_fields: Option<HashMap<String, String>>,
}

impl Command {
    /// Build a request carrying `code` and an optional body, with a freshly
    /// allocated request id.
    pub fn request(code: i32, body: Option<Vec<u8>>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            req_id: next_request_id(),
            flag: 0,
            code,
            message: None,
            body,
            ext_fields: None,
        }
    }

    /// Build a request with extension fields attached.
    pub fn request_with_ext(
        code: i32,
        body: Option<Vec<u8>>,
        ext_fields: HashMap<String, String>,
    ) -> Self {
        let mut command = Self::request(code, body);
        command.ext_fields = Some(ext_fields);
        command
    }

    /// Build a SUCCESS response for `req_id`.
    pub fn success(req_id: i32) -> Self {
        Self::success_with_body(req_id, None)
    }

    /// Build a SUCCESS response carrying a body.
    pub fn success_with_body(req_id: i32, body: Option<Vec<u8>>) -> Self {
        let mut command = Self {
            version: PROTOCOL_VERSION,
            req_id,
            flag: 0,
            code: system_code::SUCCESS,
            message: None,
            body,
            ext_fields: None,
        };
        command.mark_response();
        command
    }

    /// Build a failure response for `req_id` with a status code and message.
    pub fn failure(req_id: i32, code: i32, message: impl Into<String>) -> Self {
        let mut command = Self {
            version: PROTOCOL_VERSION,
            req_id,
            flag: 0,
            code,
            message: Some(message.into()),
            body: None,
            ext_fields: None,
        };
        command.mark_response();
        command
    }

    /// Mark this command as a response. Clears the oneway bit; a command is
    /// never both.
    pub fn mark_response(&mut self) -> &mut Self {
        self.flag = FLAG_RESPONSE;
        self
    }

    /// Mark this command as a oneway request. Clears the response bit.
    pub fn mark_oneway(&mut self) -> &mut Self {
        self.flag = FLAG_ONEWAY;
        self
    }

    pub fn is_response(&self) -> bool {
        self.flag & FLAG_RESPONSE != 0
    }

    pub fn is_oneway(&self) -> bool {
        self.flag & FLAG_ONEWAY != 0
    }

    /// True for a response carrying the SUCCESS code.
    pub fn is_success(&self) -> bool {
        self.is_response() && self.code == system_code::SUCCESS
    }

    /// Attach an extension field, creating the map on first use.
    pub fn put_ext_field(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ext_fields
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Look up an extension field.
    pub fn ext_field(&self, key: &str) -> Option<&str> {
        self.ext_fields
            .as_ref()
            .and_then(|fields| fields.get(key))
            .map(String::as_str)
    }
}
