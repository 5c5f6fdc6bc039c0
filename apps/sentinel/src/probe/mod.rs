pub mod prober;
/// Probe engine module - drives the periodic sweeps
///
/// This module is responsible for:
/// - Executing single HTTP(S) checks and classifying their outcomes
/// - Sweeping the full registry on the configured interval
/// - Funneling results into the store through one writer task
pub mod scheduler;
pub mod types;

pub use prober::{HttpProber, Prober};
pub use scheduler::{Scheduler, SweepConfig};
pub use types::ProbeResult;
