mod archive;
mod engine;
mod error;
mod policy;
mod queue;
mod rate;
mod record;
mod sink;
mod telemetry;
mod writer;

pub use engine::{LineSink, LineSinkBuilder, LockMode};
pub use error::SinkError;
pub use policy::{FlushPolicy, FlushTrigger, RateControl};
pub use record::Channel;
pub use sink::SinkMode;
pub use telemetry::TelemetrySnapshot;
