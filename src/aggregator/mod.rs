/// Workflow stream aggregation across clusters
pub mod stream_aggregator;

pub use stream_aggregator::{collect_streams, StageState, StreamAggregator, StreamsSnapshot};
