pub mod echo_server;
pub mod fixtures;
pub mod logging;

pub use echo_server::{EchoServer, EchoServerConfig};
pub use fixtures::layer_declaration;
pub use logging::{init_logging, init_test_logging};
