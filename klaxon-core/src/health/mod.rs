//! Target reachability: the periodic health monitor and the discovery
//! refresh loop feeding the registry.

mod monitor;
mod refresh;

pub use monitor::{HealthMonitor, HealthProbe, HttpHealthProbe};
pub use refresh::{RefreshLoop, StaticTargetSource, TargetSource};
