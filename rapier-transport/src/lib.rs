pub mod recorder;
pub mod template;
pub mod transport;
#[cfg(feature = "http")]
pub mod http_transport;

pub use recorder::{RecordedRequest, RecordingTransport};
pub use template::{expand, Expanded, TemplateError};
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};
#[cfg(feature = "http")]
pub use http_transport::{HttpConfig, HttpTransport};

pub use http::Method;
