//! The outcome record of a single hit.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One request outcome, as produced by the attacker and persisted in the
/// result log.
///
/// `code` is 0 when the transport failed before a status was obtained.
/// `error` is empty iff the request completed with a 2xx status; transport
/// failures carry the failure text, non-2xx responses the status reason.
/// `method` stays a plain string on the wire so logs written by newer
/// versions with a wider method set still decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub code: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_nanos")]
    pub latency: Duration,
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub error: String,
    pub method: String,
    pub url: String,
}

impl Sample {
    /// The instant the whole exchange ended: request start plus latency.
    pub fn end(&self) -> DateTime<Utc> {
        self.timestamp + chrono::Duration::from_std(self.latency).unwrap_or_default()
    }
}

/// Order samples by request start time. Reporters call this before
/// rendering anything where total order matters.
pub fn sort_by_timestamp(samples: &mut [Sample]) {
    samples.sort_by_key(|s| s.timestamp);
}

/// Durations as plain nanosecond integers, both on the wire and in the
/// structured report.
pub mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_nanos)
    }
}
