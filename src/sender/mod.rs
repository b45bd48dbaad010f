pub mod compression;
pub mod retry;
pub mod transport;

pub use compression::{CompressionError, compress_and_encode, decode_and_decompress};
pub use retry::RetryPolicy;
pub use transport::{Delivery, EventSink, Transport, TransportError, TransportPayload};

#[cfg(test)]
pub use transport::MockEventSink;
