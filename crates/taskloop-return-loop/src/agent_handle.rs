use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Enumerates the agents that can be mentioned from a task comment.
pub enum AgentHandle {
    Shade,
    Smoke,
    Nav,
}

impl AgentHandle {
    pub const ALL: [AgentHandle; 3] = [AgentHandle::Shade, AgentHandle::Smoke, AgentHandle::Nav];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentHandle::Shade => "shade",
            AgentHandle::Smoke => "smoke",
            AgentHandle::Nav => "nav",
        }
    }

    /// Case-insensitive lookup; unknown handles map to `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|handle| handle.as_str() == lowered)
    }

    /// Upper-cased suffix used for handle-specific configuration keys.
    pub fn env_suffix(self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentHandle {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw).ok_or_else(|| format!("unknown agent handle '{raw}'"))
    }
}

/// Keeps known agent handles, dropping unknown ones silently. Order follows
/// the input and duplicates are removed.
pub fn filter_agent_handles<'a, I>(handles: I) -> Vec<AgentHandle>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Vec::new();
    for raw in handles {
        if let Some(handle) = AgentHandle::parse(raw) {
            if !out.contains(&handle) {
                out.push(handle);
            }
        }
    }
    out
}
