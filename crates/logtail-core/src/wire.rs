//! JSON wire format.
//!
//! Inbound messages are envelopes routed on their `action` field, then
//! re-decoded into a typed payload for that action. Unknown extra fields
//! are ignored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::ids::correlation_id;
use crate::topic::{TopicKey, topic_key};

/// Client asks to start or stop receiving a job's log stream.
pub const ACTION_WATCH_LOG: &str = "watch_log";
/// Client keepalive.
pub const ACTION_HEART_BEAT: &str = "heart_beat";
/// Worker pushes one log line onto the bus.
pub const ACTION_WORKER_PUSH_LOG: &str = "worker_push_log";
/// Server forwards one log line to a watcher.
pub const ACTION_PUSH_LOG: &str = "push_log";
/// Server tells a watcher its stream ended abnormally.
pub const ACTION_WATCH_LOG_END: &str = "watch_log_end";

/// `errorCode` of an accepted request.
pub const ERROR_CODE_SUCCESS: i32 = 0;

/// A parsed inbound message whose payload has not been typed yet.
#[derive(Clone, Debug)]
pub struct Envelope {
    action: String,
    body: Value,
}

impl Envelope {
    /// Parse raw bytes as a JSON object carrying a string `action`.
    pub fn parse(raw: &[u8]) -> Result<Self, DecodeError> {
        let body: Value =
            serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if !body.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        let action = body
            .get("action")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingAction)?
            .to_owned();
        Ok(Self { action, body })
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Decode the whole envelope into the payload type for its action.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        T::deserialize(&self.body).map_err(|e| DecodeError::Payload {
            action: self.action.clone(),
            message: e.to_string(),
        })
    }
}

/// Requested operation on a watch.
///
/// Only `start` and `stop` decode. Any other value is a payload error that
/// closes the sending session; it is not acked and then ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchOperation {
    Start,
    Stop,
}

/// `watch_log` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub action: String,
    pub request_id: String,
    pub api: String,
    pub user_id: String,
    pub service_id: String,
    pub version_id: String,
    pub operation: WatchOperation,
}

impl WatchRequest {
    /// Topic carrying this job's log lines.
    pub fn topic(&self) -> TopicKey {
        self.job().topic()
    }

    /// The job-identifying fields, detached from the request.
    pub fn job(&self) -> JobRef {
        JobRef {
            api: self.api.clone(),
            user_id: self.user_id.clone(),
            service_id: self.service_id.clone(),
            version_id: self.version_id.clone(),
        }
    }
}

/// The four fields that identify a job run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRef {
    pub api: String,
    pub user_id: String,
    pub service_id: String,
    pub version_id: String,
}

impl JobRef {
    pub fn topic(&self) -> TopicKey {
        topic_key(&self.api, &self.user_id, &self.service_id, &self.version_id)
    }
}

/// `worker_push_log` payload. The topic is taken verbatim from the worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPushLog {
    pub topic: String,
    pub log: String,
}

/// Response to an accepted `watch_log`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPacket {
    pub action: String,
    pub request_id: String,
    pub error_code: i32,
}

impl AckPacket {
    pub fn success(action: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            request_id: request_id.into(),
            error_code: ERROR_CODE_SUCCESS,
        }
    }
}

/// One forwarded log line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushLogPacket {
    pub action: String,
    #[serde(flatten)]
    pub job: JobRef,
    pub log: String,
    pub correlation_id: String,
}

impl PushLogPacket {
    /// Build a packet for `log`, stamped with a fresh correlation id.
    pub fn new(job: &JobRef, log: impl Into<String>) -> Self {
        Self {
            action: ACTION_PUSH_LOG.to_owned(),
            job: job.clone(),
            log: log.into(),
            correlation_id: correlation_id(),
        }
    }
}

/// Why a stream ended without the client asking for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEndReason {
    ConsumerUnavailable,
    ConsumeFailed,
}

/// Best-effort notice that a watch stopped delivering lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEndPacket {
    pub action: String,
    #[serde(flatten)]
    pub job: JobRef,
    pub reason: StreamEndReason,
}

impl StreamEndPacket {
    pub fn new(job: &JobRef, reason: StreamEndReason) -> Self {
        Self {
            action: ACTION_WATCH_LOG_END.to_owned(),
            job: job.clone(),
            reason,
        }
    }
}
