//! Plain-text presentation of aggregation snapshots
//!
//! Rendering sorts a copy of the merged collection by recency; the snapshot itself
//! keeps arrival order.

use crate::aggregator::StreamsSnapshot;
use crate::streams::{sort_by_recency, ReplicationStream};
use chrono::{Local, TimeZone};
use serde_json::Value;

const HEADERS: [&str; 6] = ["State", "Workflow", "Updated at", "Cluster", "Keyspace", "Shard"];

/// One rendered row and the key identifying it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRow {
    pub key: String,
    pub cells: [String; 6],
}

impl StreamRow {
    fn from_stream(stream: &ReplicationStream) -> Self {
        Self {
            key: stream.row_key(),
            cells: [
                stream.state.to_string(),
                stream.workflow.clone(),
                format_updated_at(stream.time_updated),
                stream.cluster.clone(),
                stream.keyspace.clone(),
                stream.shard.clone(),
            ],
        }
    }
}

/// Rows in display order: most recently updated first, ties in arrival order
pub fn stream_rows(streams: &[ReplicationStream]) -> Vec<StreamRow> {
    let mut sorted = streams.to_vec();
    sort_by_recency(&mut sorted);
    sorted.iter().map(StreamRow::from_stream).collect()
}

/// Local time for an epoch-seconds timestamp
pub fn format_updated_at(epoch_seconds: i64) -> String {
    match Local.timestamp_opt(epoch_seconds, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch_seconds.to_string(),
    }
}

/// Render the stream table with aligned columns
pub fn render_stream_table(streams: &[ReplicationStream]) -> String {
    let rows = stream_rows(streams);

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(&row.cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_line = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&format_line(&HEADERS));
    out.push('\n');
    for row in &rows {
        let cells: Vec<&str> = row.cells.iter().map(String::as_str).collect();
        out.push_str(&format_line(&cells));
        out.push('\n');
    }
    out
}

/// Page header with a loading marker while either stage is in flight
pub fn render_header(snapshot: &StreamsSnapshot) -> String {
    if snapshot.is_loading() {
        "Workflows (loading...)".to_string()
    } else {
        "Workflows".to_string()
    }
}

/// Error panel offering a retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorAffordance {
    pub message: String,
    pub label: &'static str,
    /// Disabled while a retry is already in flight
    pub disabled: bool,
}

impl ErrorAffordance {
    /// `None` unless the snapshot carries an error
    pub fn from_snapshot(snapshot: &StreamsSnapshot) -> Option<Self> {
        let error = snapshot.error.as_ref()?;
        let retrying = snapshot.is_retrying();
        Some(Self {
            message: error.to_string(),
            label: if retrying { "Retrying..." } else { "Retry" },
            disabled: retrying,
        })
    }

    pub fn render(&self) -> String {
        let button = if self.disabled {
            format!("({})", self.label)
        } else {
            format!("[{}]", self.label)
        };
        format!("Error: {}\n{}\n", self.message, button)
    }
}

/// Full page for one snapshot: header, error panel if any, then the table
pub fn render_snapshot(snapshot: &StreamsSnapshot) -> String {
    let mut out = render_header(snapshot);
    out.push_str("\n\n");
    if let Some(affordance) = ErrorAffordance::from_snapshot(snapshot) {
        out.push_str(&affordance.render());
        out.push('\n');
    }
    out.push_str(&render_stream_table(snapshot.streams()));
    out
}

/// Detail view: the stream document as returned by the API
pub fn render_stream_detail(detail: &Value) -> String {
    let body = serde_json::to_string_pretty(detail).unwrap_or_else(|_| detail.to_string());
    format!("<- All workflows\n\nWorkflow Details\n\n{}\n", body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::StageState;
    use crate::error::{AggregationError, HttpError};
    use crate::streams::tests::stream;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn failed_snapshot(retrying: bool) -> StreamsSnapshot {
        StreamsSnapshot {
            clusters_state: if retrying {
                StageState::Pending
            } else {
                StageState::Error
            },
            error: Some(Arc::new(AggregationError::Clusters(HttpError::Fetch {
                endpoint: "http://localhost:14200/clusters".to_string(),
                reason: "connection refused".to_string(),
            }))),
            ..StreamsSnapshot::default()
        }
    }

    #[test]
    fn test_rows_sorted_by_recency() {
        let streams = vec![stream("c1", 1, 100), stream("c2", 2, 200)];
        let keys: Vec<String> = stream_rows(&streams).into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["c2-2", "c1-1"]);
    }

    #[test]
    fn test_row_keys_unique_across_clusters() {
        let streams = vec![
            stream("c1", 1, 100),
            stream("c2", 1, 100),
            stream("c1", 2, 100),
        ];
        let rows = stream_rows(&streams);
        let keys: HashSet<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys.len(), rows.len());
    }

    #[test]
    fn test_table_has_header_and_rows() {
        let table = render_stream_table(&[stream("local", 1, 1_600_000_000)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("State"));
        assert!(lines[0].contains("Updated at"));
        assert!(lines[1].starts_with("Running"));
        assert!(lines[1].contains("wf1"));
        assert!(lines[1].contains("local"));
        assert!(lines[1].contains(&format_updated_at(1_600_000_000)));
    }

    #[test]
    fn test_empty_table_is_header_only() {
        assert_eq!(render_stream_table(&[]).lines().count(), 1);
    }

    #[test]
    fn test_error_affordance_labels() {
        let idle = ErrorAffordance::from_snapshot(&failed_snapshot(false)).unwrap();
        assert_eq!(idle.label, "Retry");
        assert!(!idle.disabled);
        assert!(idle.render().contains("[Retry]"));

        let busy = ErrorAffordance::from_snapshot(&failed_snapshot(true)).unwrap();
        assert_eq!(busy.label, "Retrying...");
        assert!(busy.disabled);
        assert!(busy.render().contains("(Retrying...)"));

        assert!(ErrorAffordance::from_snapshot(&StreamsSnapshot::default()).is_none());
    }

    #[test]
    fn test_header_shows_loading() {
        let mut snapshot = StreamsSnapshot::default();
        assert_eq!(render_header(&snapshot), "Workflows");
        snapshot.streams_state = StageState::Pending;
        assert_eq!(render_header(&snapshot), "Workflows (loading...)");
    }

    #[test]
    fn test_detail_is_pretty_json() {
        let detail = serde_json::json!({"id": 4, "workflow": "w"});
        let out = render_stream_detail(&detail);
        assert!(out.starts_with("<- All workflows"));
        assert!(out.contains("\"workflow\": \"w\""));
    }
}
