//! Dispatch side of the proxy: target registry, per-sink clients, flush
//! rendering, and the breaker-guarded parallel publisher.

mod dispatcher;
mod fanout;
pub mod render;
mod registry;
mod sink;

pub use dispatcher::PublishDispatcher;
pub use fanout::FlushFanout;
pub use registry::{TargetDiff, TargetEvent, TargetRegistry, TargetSnapshot};
pub use sink::{HttpSinkPublisher, PublisherFactory, SinkPublisher};
