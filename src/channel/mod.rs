//! Message channel to the agent under test.

pub mod base;
pub mod http;
pub mod retry;

pub use base::AgentChannel;
pub use http::HttpAgentChannel;
