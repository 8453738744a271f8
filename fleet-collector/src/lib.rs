//! Fleet telemetry collector.
//!
//! Agents push metric samples; the collector keeps a bounded history per
//! host, tracks which hosts are still reporting, and streams every new
//! sample to live observers.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod ingest;
pub mod mqtt;
pub mod registry;
pub mod sample;
pub mod series;
pub mod sweeper;

pub use broadcast::{Broadcaster, LiveEvent, Subscription};
pub use error::{ConfigError, IngestError};
pub use ingest::{IngestionService, SharedIngestion};
pub use registry::{Registry, SweepReport};
pub use sample::Sample;
pub use series::HostSeries;
pub use sweeper::{spawn_liveness_sweeper, LivenessPolicy};
