pub mod config;
pub mod errors;
pub mod http_client;
pub mod logging;
pub mod time;

pub use config::SubmitterConfig;
pub use errors::SubmitError;
pub use http_client::HttpClient;
