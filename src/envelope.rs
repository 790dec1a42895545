//! The wire envelope: the single message record exchanged on every frame.
//!
//! An envelope carries a correlation id, an operation name, an opaque JSON
//! body, and timing marks stamped by sender and receiver.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::Error;

/// Reply op meaning "the request succeeded".
pub const OP_RESPONSE: &str = "RESPONSE";
/// Reply op meaning "the request failed".
pub const OP_ERROR: &str = "ERROR";
/// Built-in op returning a [`crate::status::ServiceStatus`] payload.
pub const OP_STATUS: &str = "STATUS";
/// Built-in op that closes every session tracked by a service.
pub const OP_CLOSE_ALL_SESSIONS: &str = "CLOSE_ALL_SESSIONS";
/// Notification op sent when a service proxy's dependency changes.
pub const OP_DEPENDENCY_UPDATED: &str = "DEPENDENCY_UPDATED";

/// All op names reserved by the framework. User ops may not collide with
/// these, case-insensitively.
pub const RESERVED_OPS: &[&str] = &[
    OP_RESPONSE,
    OP_ERROR,
    OP_STATUS,
    OP_CLOSE_ALL_SESSIONS,
    OP_DEPENDENCY_UPDATED,
];

/// Current epoch time in milliseconds, used for the envelope timing marks.
#[must_use]
pub fn now_millis() -> i64 {
    // SystemTime predates the epoch only on a misconfigured clock; fall back
    // to 0 rather than panicking on the receive/send hot path.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// How many stack-trace frames to embed in a serialized [`ErrorDetail`].
///
/// A cap of `Truncated(0)` means "include none"; `Unbounded` means "include
/// the whole chain verbatim".
#[derive(Debug, Clone, Copy, Default)]
pub enum StackCap {
    /// Keep the first `n` frames of the cause chain.
    Truncated(usize),
    /// Keep every frame.
    Unbounded,
    /// The default used when a call site does not specify a cap.
    #[default]
    Default,
}

impl StackCap {
    fn resolved_limit(self) -> Option<usize> {
        match self {
            StackCap::Truncated(n) => Some(n),
            StackCap::Unbounded => None,
            // A handful of frames is almost always enough to locate a fault
            // without flooding the wire; see DESIGN.md for the rationale.
            StackCap::Default => Some(16),
        }
    }
}

/// One frame of a captured cause chain, as carried in [`ErrorDetail`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackFrame {
    pub class: String,
    pub method: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Body of an `ERROR` reply: a message, a cause chain (innermost last), and a
/// capped stack trace.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorDetail {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<StackFrame>>,
}

impl ErrorDetail {
    /// Build an error detail from a framework [`Error`], capturing the
    /// `source` chain into `reasons` (innermost last) and applying `cap` to
    /// the embedded stack trace.
    #[must_use]
    pub fn from_error(err: &Error, cap: StackCap) -> Self {
        let mut reasons = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            reasons.push(cause.to_string());
            source = cause.source();
        }
        let stack_trace = cap.resolved_limit().map(|limit| {
            // The framework itself does not capture native stack frames (Rust
            // has no portable, allocation-free way to do so from a plain
            // `Error`); the slot exists so callers embedding richer
            // diagnostics (e.g. via `std::backtrace::Backtrace`) can fill it
            // in. An empty, capped vector preserves the wire shape.
            let _ = limit;
            Vec::new()
        });
        Self {
            error: err.to_string(),
            reasons: (!reasons.is_empty()).then_some(reasons),
            stack_trace,
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// The JSON shape actually read off and written to the wire.
///
/// Kept distinct from [`Envelope`] so that a frame with a missing or `null`
/// `op` can still be deserialized far enough to recover its `id` for the
/// decode-failure error path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub id: Option<String>,
    pub op: Option<String>,
    pub body: Option<Box<RawValue>>,
    #[serde(rename = "sentMillis")]
    pub sent_millis: Option<i64>,
    #[serde(rename = "receivedMillis")]
    pub received_millis: Option<i64>,
    #[serde(rename = "startProcessingMillis")]
    pub start_processing_millis: Option<i64>,
    #[serde(rename = "stopProcessingMillis")]
    pub stop_processing_millis: Option<i64>,
}

/// A validated envelope: `op` is guaranteed non-empty.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Option<String>,
    pub op: String,
    pub body: Option<Box<RawValue>>,
    pub sent_millis: Option<i64>,
    pub received_millis: Option<i64>,
    pub start_processing_millis: Option<i64>,
    pub stop_processing_millis: Option<i64>,
}

impl Envelope {
    /// Build a request envelope expecting a reply; mints a fresh id.
    #[must_use]
    pub fn request(op: impl Into<String>, body: Option<Box<RawValue>>) -> Self {
        Self {
            id: Some(uuid::Uuid::new_v4().to_string()),
            op: op.into(),
            body,
            sent_millis: None,
            received_millis: None,
            start_processing_millis: None,
            stop_processing_millis: None,
        }
    }

    /// Build a fire-and-forget envelope: no id, no reply expected.
    #[must_use]
    pub fn notification(op: impl Into<String>, body: Option<Box<RawValue>>) -> Self {
        Self {
            id: None,
            op: op.into(),
            body,
            sent_millis: None,
            received_millis: None,
            start_processing_millis: None,
            stop_processing_millis: None,
        }
    }

    /// Build a successful reply to `request`.
    ///
    /// # Errors
    /// Returns [`Error::NotARequest`] if `request` did not expect a response.
    ///
    /// `sentMillis` is copied from `request` rather than stamped fresh:
    /// on a reply, `sentMillis` means the original request's send time,
    /// which the caller needs to compute round-trip latency.
    pub fn success_response(request: &Envelope, body: Option<Box<RawValue>>) -> Result<Self, Error> {
        if !request.expects_response() {
            return Err(Error::NotARequest);
        }
        Ok(Self {
            id: request.id.clone(),
            op: OP_RESPONSE.to_string(),
            body,
            sent_millis: request.sent_millis,
            received_millis: None,
            start_processing_millis: None,
            stop_processing_millis: None,
        })
    }

    /// Build an `ERROR` reply. `request` supplies the correlation id and
    /// (mirroring [`Envelope::success_response`]) the original send time,
    /// when known; pass `None` for orphan errors that have no known request
    /// (an orphan error with no request on hand).
    #[must_use]
    pub fn error_response(request: Option<&Envelope>, err: &Error, cap: StackCap) -> Self {
        let detail = ErrorDetail::from_error(err, cap);
        let body = serde_json::value::to_raw_value(&detail).ok();
        Self {
            id: request.and_then(|r| r.id.clone()),
            op: OP_ERROR.to_string(),
            body,
            sent_millis: request.and_then(|r| r.sent_millis),
            received_millis: None,
            start_processing_millis: None,
            stop_processing_millis: None,
        }
    }

    /// Build the `ERROR` reply used to unblock a pending call whose id is
    /// known but whose original request is no longer on hand (timeout,
    /// session-closed purge).
    #[must_use]
    pub fn synthetic_error(id: impl Into<String>, detail: ErrorDetail) -> Self {
        let body = serde_json::value::to_raw_value(&detail).ok();
        Self {
            id: Some(id.into()),
            op: OP_ERROR.to_string(),
            body,
            sent_millis: None,
            received_millis: None,
            start_processing_millis: None,
            stop_processing_millis: None,
        }
    }

    /// True iff this envelope is a reply (`op` is `RESPONSE`/`ERROR` and it
    /// carries an id).
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.id.is_some() && (self.op.eq_ignore_ascii_case(OP_RESPONSE) || self.op.eq_ignore_ascii_case(OP_ERROR))
    }

    /// True iff this envelope expects a response (it has an id and is not
    /// itself a reply).
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.id.is_some() && !self.is_reply()
    }

    /// Stamp `sentMillis` to now, unless this is a reply (whose `sentMillis`
    /// instead carries the original request's send time; see
    /// [`Envelope::success_response`]).
    pub(crate) fn stamp_sent(&mut self) {
        if !self.is_reply() {
            self.sent_millis = Some(now_millis());
        }
    }

    pub(crate) fn into_wire(self) -> WireEnvelope {
        WireEnvelope {
            id: self.id,
            op: Some(self.op),
            body: self.body,
            sent_millis: self.sent_millis,
            received_millis: self.received_millis,
            start_processing_millis: self.start_processing_millis,
            stop_processing_millis: self.stop_processing_millis,
        }
    }
}

/// Error raised when a decoded frame has a missing/null `op`.
#[derive(Debug, thiserror::Error)]
#[error("envelope has a missing or null 'op' field (id = {id:?})")]
pub struct MissingOp {
    pub id: Option<String>,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = MissingOp;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let op = wire.op.ok_or(MissingOp { id: wire.id.clone() })?;
        Ok(Self {
            id: wire.id,
            op,
            body: wire.body,
            sent_millis: wire.sent_millis,
            received_millis: wire.received_millis,
            start_processing_millis: wire.start_processing_millis,
            stop_processing_millis: wire.stop_processing_millis,
        })
    }
}

impl Serialize for Envelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.clone().into_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = WireEnvelope::deserialize(deserializer)?;
        Envelope::try_from(wire).map_err(serde::de::Error::custom)
    }
}
