//! The outbound side of the engine: HTTP transport, response/error
//! classification, and the cancellable retry loop that wraps both.

pub mod outcome;
pub mod retry;
pub mod transport;

pub use outcome::{ConnectFailurePolicy, DeliveryOutcome};
pub use retry::{DeliveryError, DeliveryReceipt, RetryPolicy};
pub use transport::{HttpResponse, HttpTransport, RemoteEndpoint, TransportError};
