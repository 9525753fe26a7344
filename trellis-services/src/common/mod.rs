pub mod default_headers;
pub mod log;
pub mod timeout;

pub use default_headers::default_headers;
pub use log::log_requests;
pub use timeout::timeout;
