//! Core data types for workflow replication streams
//!
//! Records are decoded into [`ReplicationStream`] at the HTTP boundary, so every
//! numeric field is already typed by the time anything sorts or renders them.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque name of a managed database cluster
pub type ClusterId = String;

/// State reported for a replication stream
///
/// Decodes from the state name in any case, or from the numeric protobuf value
/// (`0` running, `1` stopped). An absent state is the protobuf zero value, `Running`.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, Hash)]
pub enum StreamState {
    #[default]
    Running,
    Stopped,
    /// Any state this client does not model (copying, error, lagging...)
    Unknown,
}

impl StreamState {
    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "running" => StreamState::Running,
            "stopped" => StreamState::Stopped,
            _ => StreamState::Unknown,
        }
    }

    fn from_number(value: i64) -> Self {
        match value {
            0 => StreamState::Running,
            1 => StreamState::Stopped,
            _ => StreamState::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for StreamState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StateVisitor;

        impl<'de> Visitor<'de> for StateVisitor {
            type Value = StreamState;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a stream state name or number")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<StreamState, E> {
                Ok(StreamState::from_number(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<StreamState, E> {
                Ok(i64::try_from(v)
                    .map(StreamState::from_number)
                    .unwrap_or(StreamState::Unknown))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<StreamState, E> {
                Ok(StreamState::from_name(v))
            }

            fn visit_unit<E: de::Error>(self) -> Result<StreamState, E> {
                Ok(StreamState::default())
            }
        }

        deserializer.deserialize_any(StateVisitor)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Running => "Running",
            StreamState::Stopped => "Stopped",
            StreamState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// One replication workflow instance tracked on a tablet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationStream {
    /// Identifier, unique within its cluster
    #[serde(deserialize_with = "int64")]
    pub id: i64,
    pub workflow: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub pos: String,
    #[serde(default)]
    pub stop_pos: String,
    #[serde(default, deserialize_with = "int64")]
    pub max_tps: i64,
    #[serde(default, deserialize_with = "int64")]
    pub max_replication_lag: i64,
    #[serde(default)]
    pub cell: String,
    #[serde(default)]
    pub tablet_types: Vec<String>,
    /// Last update, epoch seconds; zero when never updated
    #[serde(default, deserialize_with = "int64")]
    pub time_updated: i64,
    #[serde(default, deserialize_with = "int64")]
    pub transaction_timestamp: i64,
    #[serde(default)]
    pub state: StreamState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub cluster: ClusterId,
    #[serde(default)]
    pub keyspace: String,
    #[serde(default)]
    pub shard: String,
    #[serde(default)]
    pub tablet_alias: String,
}

impl ReplicationStream {
    /// Identity of this record's row: `<cluster>-<id>`
    pub fn row_key(&self) -> String {
        format!("{}-{}", self.cluster, self.id)
    }
}

/// Order streams most-recently-updated first
///
/// `sort_by` is stable, so streams updated at the same second keep their arrival order.
pub fn sort_by_recency(streams: &mut [ReplicationStream]) {
    streams.sort_by(|a, b| b.time_updated.cmp(&a.time_updated));
}

/// Accepts an int64 as a JSON number or as a numeric string (protobuf JSON encoding)
fn int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct Int64Visitor;

    impl<'de> Visitor<'de> for Int64Visitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an integer or numeric string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom(format!("integer {} out of range", v)))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            // i64::MAX as f64 rounds up to 2^63, which is itself out of range
            if v.fract() != 0.0 || !v.is_finite() {
                Err(E::custom(format!("{} is not a whole number", v)))
            } else if v < i64::MIN as f64 || v >= i64::MAX as f64 {
                Err(E::custom(format!("integer {} out of range", v)))
            } else {
                Ok(v as i64)
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.trim()
                .parse::<i64>()
                .map_err(|_| E::custom(format!("{:?} is not numeric", v)))
        }
    }

    deserializer.deserialize_any(Int64Visitor)
}
