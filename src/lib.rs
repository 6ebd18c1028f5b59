pub mod app;
pub mod config;
pub mod dialer;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod sni;
pub mod stats;
pub mod supervisor;
pub mod tls_utils;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use dialer::{Dialer, ProxyStream, resolve_from_environment};
pub use error::{DialError, PeekError, ProxyError};
pub use sni::{ClientHelloInfo, HelloPeeker, PeekedStream};
pub use supervisor::ConnectionSupervisor;
