//! Runtime configuration for vibeforge.
//!
//! [`RuntimeConfig`] is constructed manually or read from `VIBEFORGE_*`
//! environment variables with [`RuntimeConfig::from_env`]. No config-file
//! parsing crate is introduced — the same stance the teacher takes with
//! `CloudLLMConfig`.
//!
//! # Example
//!
//! ```rust
//! use vibeforge::config::RuntimeConfig;
//! use std::path::PathBuf;
//!
//! let config = RuntimeConfig {
//!     workspace_root: PathBuf::from("/tmp/vibeforge_sessions"),
//!     ..RuntimeConfig::default()
//! };
//! ```

use std::env;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// How the core should treat LLM calls for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMode {
    /// Call the configured [`LlmClient`](crate::llm_client::LlmClient) for real.
    Real,
    /// Skip the LLM entirely and use deterministic stub replies.
    Stub,
    /// Build requests but never send them; useful for cost-free smoke runs.
    DryRun,
}

impl Default for LlmMode {
    fn default() -> Self {
        LlmMode::Real
    }
}

/// Process-wide runtime configuration.
///
/// This struct is intentionally minimal; users construct it directly or via
/// [`RuntimeConfig::from_env`]. No TOML/YAML config-file crate is introduced.
pub struct RuntimeConfig {
    /// Root directory under which each session's `events.jsonl`, `repo/`,
    /// and `artifacts/` live.
    pub workspace_root: PathBuf,
    /// Bearer token(s) accepted for HTTP auth on the control plane, read
    /// from `VIBEFORGE_AUTH_TOKEN` / `VIBEFORGE_AUTH_TOKENS`.
    pub auth_tokens: Vec<String>,
    /// LLM mode, read from `VIBEFORGE_LLM_MODE` (`stub` | `dry_run`, default `real`).
    pub llm_mode: LlmMode,
    /// `VIBEFORGE_NO_SPEND=1` disables LLM calls and smoke verification.
    pub no_spend: bool,
    /// Heartbeat timeout for remote agent connections, in seconds.
    pub heartbeat_timeout_seconds: u64,
    /// Heartbeat sweep interval, in seconds.
    pub heartbeat_check_interval_seconds: u64,
    /// How long a pending remote dispatch may sit unresolved before it is
    /// treated as timed out.
    pub dispatch_timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspaces"),
            auth_tokens: Vec::new(),
            llm_mode: LlmMode::default(),
            no_spend: false,
            heartbeat_timeout_seconds: 30,
            heartbeat_check_interval_seconds: 5,
            dispatch_timeout_seconds: 300,
        }
    }
}

impl RuntimeConfig {
    /// Build a config from `VIBEFORGE_*` environment variables, falling back
    /// to [`RuntimeConfig::default`] for anything unset.
    ///
    /// - `VIBEFORGE_AUTH_TOKEN` / `VIBEFORGE_AUTH_TOKENS` (comma-separated)
    /// - `VIBEFORGE_LLM_MODE` (`stub` | `dry_run`, anything else is `real`)
    /// - `VIBEFORGE_NO_SPEND` (`1` disables LLM calls and smoke verification)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = env::var("VIBEFORGE_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }

        let mut tokens = Vec::new();
        if let Ok(single) = env::var("VIBEFORGE_AUTH_TOKEN") {
            if !single.is_empty() {
                tokens.push(single);
            }
        }
        if let Ok(many) = env::var("VIBEFORGE_AUTH_TOKENS") {
            tokens.extend(many.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
        }
        config.auth_tokens = tokens;

        if let Ok(mode) = env::var("VIBEFORGE_LLM_MODE") {
            config.llm_mode = match mode.as_str() {
                "stub" => LlmMode::Stub,
                "dry_run" => LlmMode::DryRun,
                _ => LlmMode::Real,
            };
        }

        config.no_spend = matches!(env::var("VIBEFORGE_NO_SPEND").as_deref(), Ok("1"));
        if config.no_spend {
            config.llm_mode = LlmMode::Stub;
        }

        config
    }

    /// Check a bearer token presented by an HTTP client against the
    /// configured `auth_tokens`. Hashes both sides first and compares with
    /// `ConstantTimeEq` so a timing oracle can't leak how many leading bytes
    /// matched; an empty `auth_tokens` list accepts nothing.
    pub fn verify_auth_token(&self, presented: &str) -> bool {
        let presented_hash = Sha256::digest(presented.as_bytes());
        self.auth_tokens.iter().any(|expected| {
            let expected_hash = Sha256::digest(expected.as_bytes());
            expected_hash.ct_eq(&presented_hash).into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_auth_token_accepts_a_configured_token() {
        let config = RuntimeConfig { auth_tokens: vec!["s3cr3t".to_string()], ..RuntimeConfig::default() };
        assert!(config.verify_auth_token("s3cr3t"));
        assert!(!config.verify_auth_token("wrong"));
    }

    #[test]
    fn verify_auth_token_rejects_everything_when_unset() {
        let config = RuntimeConfig::default();
        assert!(!config.verify_auth_token(""));
        assert!(!config.verify_auth_token("anything"));
    }
}
