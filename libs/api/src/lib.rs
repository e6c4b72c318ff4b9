pub mod error;
pub mod pipeline;
pub mod types;
pub mod util;

pub use error::{ErrorKind, TelemetryError};
pub use pipeline::{SampleCodec, SampleSource, Transport, TransportFuture};
pub use types::{ConnectionState, QoS, Sample, WireRecord};
pub use util::now_ms;
