// Bearer Client - Library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod transport;

pub use error::{classify, ApiError, ErrorKind};
pub use http_client::AuthClient;
