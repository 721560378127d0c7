mod client;
mod memory;
mod pipeline;
mod relay;
mod router;
mod session;

pub use client::{ConsumeStats, StreamClient};
pub use memory::{MemoryBroker, MemorySubscription};
pub use pipeline::{MessageOrigin, PipelineReport, SessionStatus, StreamInput, StreamPipeline, TopicStream};
pub use relay::{Passthrough, SampleModel, TSampleRelay};
pub use router::MessageRouter;
pub use session::{
    DEFAULT_BUFFER_CAPACITY, SessionTelemetryDataInput, TelemetryDataBuffer, TelemetryDataFeed,
    TelemetryDataFeedEventArgs,
};

pub use tokio_util::sync::CancellationToken;
