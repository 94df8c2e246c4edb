// Throughput export to the metrics gateway

pub mod pusher;

pub use pusher::{is_valid_job_label, MetricsPusher};
