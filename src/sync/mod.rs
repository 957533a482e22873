pub mod rate;
pub mod signal;

pub use rate::{RateMeter, Telemetry};
pub use signal::ReadySignal;
