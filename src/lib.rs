pub mod classify;
pub mod config;
pub mod director;
pub mod error;
pub mod handler;
pub mod headers;
pub mod logging;
pub mod response;
pub mod server;
pub mod transport;

pub use config::{BackendConfig, Config};
pub use error::{BackendError, ProxyError};
pub use handler::BackendHandler;
pub use logging::{BackendLogger, BackendRequest, LogDetails};
