//! Attack-pattern shielding and bot classification.
//!
//! The oracle is an external collaborator behind a narrow trait; its verdict
//! is independent of the rate counters. [`UserAgentOracle`] is the shipped
//! in-process implementation, classifying on request metadata alone.

use async_trait::async_trait;

use super::RequestMetadata;
use crate::config::SecurityConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OracleVerdict {
    Allow,
    BlockBot,
    BlockShield,
}

#[async_trait]
pub trait AdmissionOracle: Send + Sync {
    async fn evaluate(&self, meta: &RequestMetadata) -> OracleVerdict;
}

/// Markers of automated clients. Agents matching `allowed_agents` (e.g.
/// search engine crawlers) are exempt.
const BOT_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scrapy",
    "curl/",
    "wget/",
    "python-requests",
    "go-http-client",
];

/// Markers of attack tooling, blocked regardless of the bot allowlist.
const SHIELD_MARKERS: &[&str] = &["sqlmap", "nikto", "nmap", "masscan", "zgrab"];

pub struct UserAgentOracle {
    config: SecurityConfig,
}

impl UserAgentOracle {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AdmissionOracle for UserAgentOracle {
    async fn evaluate(&self, meta: &RequestMetadata) -> OracleVerdict {
        let agent = meta
            .user_agent
            .as_deref()
            .unwrap_or("")
            .to_ascii_lowercase();

        if self.config.enable_shield
            && SHIELD_MARKERS.iter().any(|marker| agent.contains(marker))
        {
            return OracleVerdict::BlockShield;
        }

        if self.config.enable_bot_detection {
            if agent.trim().is_empty() {
                return OracleVerdict::BlockBot;
            }
            let exempt = self
                .config
                .allowed_agents
                .iter()
                .any(|allowed| agent.contains(&allowed.to_ascii_lowercase()));
            if !exempt && BOT_MARKERS.iter().any(|marker| agent.contains(marker)) {
                return OracleVerdict::BlockBot;
            }
        }

        OracleVerdict::Allow
    }
}
