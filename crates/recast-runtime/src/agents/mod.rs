//! Generation agents.
//!
//! Every stage of a revision round talks to one agent through the
//! [`GenerationAgent`] text-in/text-out contract.

mod provider_agent;
mod traits;

pub use provider_agent::ProviderAgent;
pub use traits::{AgentError, AgentRole, GenerationAgent};
