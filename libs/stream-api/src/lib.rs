pub mod error;
pub mod format;
pub mod key;
pub mod message;
pub mod transport;

pub use error::StreamError;
pub use format::{DependencyKind, FeedFormat, FormatDefinition, FormatId, FormatState};
pub use key::{Key, MessageKind};
pub use message::{Message, SessionInfo, SessionState, TSamples, TelemetryData, TimeSeries};
pub use transport::{
    DependencyClient, OverflowPolicy, RawRecord, RecordHandler, RecordSubscription, StreamTransport, now_ms,
};
pub use uuid::Uuid;
