//! Network plumbing between resource clients and the remote API.

mod dispatcher;
pub mod envelope;
mod transport;

pub use dispatcher::Dispatcher;
pub use envelope::ApiRequest;
pub use reqwest::Method;
pub use transport::Transport;
