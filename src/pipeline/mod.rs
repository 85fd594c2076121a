pub mod control;
pub mod worker;

pub use crate::decode::dispatcher::ScanGeometry;
pub use control::ScanControl;
pub use worker::{PipelineStats, ScanWorker, StatsSnapshot};
