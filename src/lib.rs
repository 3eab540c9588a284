//! ShroudCore: device-bound content scrambling and threat-adaptive mutation
//!
//! Binds a deterministic scramble recipe to a device fingerprint and a
//! short-lived session, enforces one-time issuance tokens with anti-replay
//! and anti-injection checks, classifies content against an external scoring
//! oracle, and mutates risky content before it crosses the server boundary.
//!
//! Scrambling is obfuscation, not encryption. Anything requiring real
//! confidentiality (privileged plaintext, snapshots) goes through the
//! AES-GCM master key supplied by the credentials vault.

pub mod analyzer;
pub mod crypto;
pub mod errors;
pub mod fingerprint;
pub mod logging;
pub mod mutation;
pub mod oracle;
pub mod orchestrator;
pub mod pattern;
pub mod persistence;
pub mod scrambler;
pub mod session;
pub mod tracker;

// Re-exports
pub use analyzer::{
    screen_injection, AnalyzerConfig, ContentAnalysisResult, ContentThreatAnalyzer,
    ContentThreatLevel, ContentType, Violation,
};
pub use crypto::MasterKey;
pub use errors::{ErrorContext, Result, ShroudError};
pub use fingerprint::{
    DeviceFingerprint, DeviceFingerprintRegistry, DeviceId, DeviceSignals, MIN_SIGNAL_QUORUM,
};
pub use mutation::{MutationPlan, MutationStrategySelector, MutationStrength, PolicyContext};
pub use oracle::{HttpScoringOracle, OracleConfig, OracleScore, ScoringOracle};
pub use orchestrator::{Dashboard, ObfuscationOrchestrator, ScrambledContent};
pub use pattern::{EngineConfig, PatternRef, ScramblePattern, ScramblePatternEngine};
pub use persistence::{Snapshot, SnapshotStore};
pub use scrambler::ContentScrambler;
pub use session::{IssuedSession, SessionConfig, SessionTokenManager, TokenState};
pub use tracker::{AccessLevel, ConversationEntry, ConversationTracker, TrackerConfig};

use std::time::Duration;

/// Main configuration for ShroudCore
#[derive(Debug, Clone)]
pub struct ShroudConfig {
    /// Lifetime of newly issued sessions
    pub session_ttl: Duration,
    /// Consecutive clock-skew failures before a session is invalidated
    pub skew_strike_limit: u32,
    /// Token required by the privileged inspection surface
    pub admin_token: String,
    /// Session/token validation configuration
    pub session: SessionConfig,
    /// Pattern evolution cadence
    pub engine: EngineConfig,
    /// Threat analysis configuration
    pub analyzer: AnalyzerConfig,
    /// Scoring oracle transport configuration
    pub oracle: OracleConfig,
    /// Audit retention configuration
    pub tracker: TrackerConfig,
}

impl Default for ShroudConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(30 * 60),
            skew_strike_limit: 3,
            admin_token: String::new(),
            session: SessionConfig::default(),
            engine: EngineConfig::default(),
            analyzer: AnalyzerConfig::default(),
            oracle: OracleConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}
