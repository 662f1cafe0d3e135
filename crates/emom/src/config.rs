//! Connection configuration.

use std::time::Duration;

use anyhow::{bail, Result};
use emom_core::{Seqno, CALL_METHOD, NOTIFY_METHOD};
use serde::{Deserialize, Serialize};

/// Settings shared by the client and server ends of a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmomConfig {
    /// First seqno of a connection, on both ends.
    pub first_seqno: Seqno,

    /// How long the server's admission gate lets a call wait for its turn
    /// (milliseconds)
    pub sequencer_timeout_ms: u64,

    /// Maximum distance between an auth token's creation time and now
    /// (seconds)
    pub token_freshness_secs: u64,

    /// Transport method carrying encrypted calls
    pub call_method: String,

    /// Transport method carrying notifications
    pub notify_method: String,
}

impl Default for EmomConfig {
    fn default() -> Self {
        Self {
            first_seqno: 1,
            sequencer_timeout_ms: 30_000,
            token_freshness_secs: 600,
            call_method: CALL_METHOD.to_string(),
            notify_method: NOTIFY_METHOD.to_string(),
        }
    }
}

impl EmomConfig {
    pub fn sequencer_timeout(&self) -> Duration {
        Duration::from_millis(self.sequencer_timeout_ms)
    }

    pub fn token_freshness(&self) -> Duration {
        Duration::from_secs(self.token_freshness_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sequencer_timeout_ms == 0 {
            bail!("sequencer_timeout_ms must be positive");
        }
        if self.token_freshness_secs == 0 {
            bail!("token_freshness_secs must be positive");
        }
        if self.call_method.is_empty() || self.notify_method.is_empty() {
            bail!("transport method names must not be empty");
        }
        if self.call_method == self.notify_method {
            bail!("call and notify methods must differ");
        }
        Ok(())
    }
}
