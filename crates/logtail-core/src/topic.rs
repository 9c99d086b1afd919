//! Bus topic naming.
//!
//! A job's log topic is `api__userId__serviceId__versionId`, with every `-`
//! in each component replaced by `_`. Workers and watchers must derive the
//! same key from the same four fields, so this is the only place the format
//! is spelled out.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the four identifying components.
pub const TOPIC_SEPARATOR: &str = "__";

/// Bus topic carrying the log lines of one job run.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicKey(String);

impl TopicKey {
    /// Wrap a topic name as-is (used for worker-supplied ingress topics).
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn sanitize(component: &str) -> String {
    component.replace('-', "_")
}

/// Derive the topic key for a job from its identifying fields.
pub fn topic_key(api: &str, user_id: &str, service_id: &str, version_id: &str) -> TopicKey {
    let parts = [api, user_id, service_id, version_id].map(sanitize);
    TopicKey(parts.join(TOPIC_SEPARATOR))
}
