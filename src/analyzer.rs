//! Content threat analysis
//!
//! Classification is delegated to an external scoring oracle; this module
//! owns the mapping from raw scores to the ordered threat ladder, the
//! combination rule (max severity wins, confidence-weighted), and the derived
//! block/verification flags. A local lexicon prefilter backstops the oracle
//! so the worst categories are caught even when the service is down.

use crate::oracle::{OracleScore, ScoringOracle};
use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Content classification for a unit crossing the server boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Text,
    Markup,
    Binary,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Markup => "markup",
            ContentType::Binary => "binary",
        }
    }
}

/// Ordered threat severity. Ordering is load-bearing: policy decisions
/// compare levels directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ContentThreatLevel {
    Safe,
    Suspicious,
    AdultContent,
    NsfwExplicit,
    Profanity,
    HateSpeech,
    CriticalViolation,
}

/// A named violation with its confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub name: String,
    pub confidence: f32,
    pub level: ContentThreatLevel,
}

/// Immutable verdict for one content unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentAnalysisResult {
    pub content_type: ContentType,
    pub threat_level: ContentThreatLevel,
    pub confidence: f32,
    pub violations: Vec<Violation>,
    pub requires_complete_block: bool,
    pub requires_age_verification: bool,
}

/// Analyzer configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Threat level at or above which content is always blocked outright.
    pub hard_block_ceiling: ContentThreatLevel,
    /// Budget for one oracle round trip; elapsing it fails closed.
    pub oracle_timeout: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            hard_block_ceiling: ContentThreatLevel::CriticalViolation,
            oracle_timeout: Duration::from_secs(5),
        }
    }
}

/// Lexicon backstop, keyed by the level its hits map to. Intentionally
/// coarse; the oracle is the primary classifier.
static LEXICONS: Lazy<Vec<(ContentThreatLevel, &'static str, AhoCorasick)>> = Lazy::new(|| {
    let build = |terms: &[&str]| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(terms)
            .expect("lexicon build")
    };

    vec![
        (
            ContentThreatLevel::HateSpeech,
            "hate_speech",
            build(&[
                "racial purity",
                "ethnic cleansing",
                "subhuman vermin",
                "exterminate them all",
                "gas the",
            ]),
        ),
        (
            ContentThreatLevel::Profanity,
            "profanity",
            build(&["bullshit", "goddamn", "asshole", "motherfucker"]),
        ),
        (
            ContentThreatLevel::AdultContent,
            "adult_content",
            build(&["explicit nudity", "xxx rated", "softcore"]),
        ),
    ]
});

/// Prompt-injection / smuggling markers screened on admitted plaintext.
static INJECTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "instruction_override",
            Regex::new(r"(?i)\bignore\s+(all\s+)?(previous|prior)\s+instructions\b").unwrap(),
        ),
        (
            "prompt_extraction",
            Regex::new(r"(?i)\b(reveal|repeat|print)\s+(your\s+)?(system\s+prompt|instructions)\b")
                .unwrap(),
        ),
        (
            "script_smuggling",
            Regex::new(r"(?is)<\s*script\b|javascript\s*:").unwrap(),
        ),
        (
            "token_forgery",
            Regex::new(r"\[(SESSION|TOKEN|PATTERN)-[0-9a-f]{8,}\]").unwrap(),
        ),
    ]
});

/// Screen admitted plaintext for injection markers. Returns the first
/// matching category.
pub fn screen_injection(content: &str) -> Option<&'static str> {
    INJECTION_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(content))
        .map(|(name, _)| *name)
}

/// Map an oracle violation name onto the threat ladder.
fn level_for_name(name: &str) -> ContentThreatLevel {
    let name = name.to_ascii_lowercase();
    if name.contains("hate") {
        ContentThreatLevel::HateSpeech
    } else if name.contains("critical") || name.contains("injection") || name.contains("csam") {
        ContentThreatLevel::CriticalViolation
    } else if name.contains("profan") || name.contains("slur") {
        ContentThreatLevel::Profanity
    } else if name.contains("nsfw") || name.contains("explicit") {
        ContentThreatLevel::NsfwExplicit
    } else if name.contains("adult") || name.contains("suggestive") || name.contains("nudity") {
        ContentThreatLevel::AdultContent
    } else {
        ContentThreatLevel::Suspicious
    }
}

/// Produces a structured risk verdict for a content unit.
pub struct ContentThreatAnalyzer {
    oracle: Arc<dyn ScoringOracle>,
    config: AnalyzerConfig,
}

impl ContentThreatAnalyzer {
    pub fn new(oracle: Arc<dyn ScoringOracle>, config: AnalyzerConfig) -> Self {
        Self { oracle, config }
    }

    /// Analyze one content unit.
    ///
    /// Oracle failure or timeout never degrades below `Suspicious`: the
    /// analyzer fails closed rather than letting unscored content through as
    /// `Safe`.
    pub async fn analyze(&self, content: &str, content_type: ContentType) -> ContentAnalysisResult {
        let mut violations = self.lexicon_hits(content);

        let oracle_result =
            tokio::time::timeout(self.config.oracle_timeout, self.oracle.score(content, content_type))
                .await;

        match oracle_result {
            Ok(Ok(score)) => violations.extend(Self::map_oracle_score(score)),
            Ok(Err(e)) => {
                warn!(error = %e, "scoring oracle failed; failing closed at Suspicious");
                violations.push(Violation {
                    name: "oracle_unavailable".into(),
                    confidence: 0.5,
                    level: ContentThreatLevel::Suspicious,
                });
            }
            Err(_) => {
                warn!("scoring oracle timed out; failing closed at Suspicious");
                violations.push(Violation {
                    name: "oracle_timeout".into(),
                    confidence: 0.5,
                    level: ContentThreatLevel::Suspicious,
                });
            }
        }

        self.combine(content_type, violations)
    }

    fn map_oracle_score(score: OracleScore) -> Vec<Violation> {
        score
            .violations
            .into_iter()
            .map(|(name, confidence)| Violation {
                level: level_for_name(&name),
                name,
                confidence: confidence.clamp(0.0, 1.0),
            })
            .collect()
    }

    fn lexicon_hits(&self, content: &str) -> Vec<Violation> {
        let mut hits = Vec::new();
        for (level, name, matcher) in LEXICONS.iter() {
            let count = matcher.find_iter(content).count();
            if count > 0 {
                // More hits, more confidence, saturating well below certainty.
                let confidence = (0.6 + 0.1 * count as f32).min(0.9);
                hits.push(Violation {
                    name: (*name).to_string(),
                    confidence,
                    level: *level,
                });
            }
        }
        hits
    }

    /// Max severity wins; confidence combines the evidence at that severity.
    fn combine(
        &self,
        content_type: ContentType,
        violations: Vec<Violation>,
    ) -> ContentAnalysisResult {
        let threat_level = violations
            .iter()
            .map(|v| v.level)
            .max()
            .unwrap_or(ContentThreatLevel::Safe);

        let confidence = if threat_level == ContentThreatLevel::Safe {
            1.0
        } else {
            // Independent-evidence combination over the top-severity hits.
            let miss: f32 = violations
                .iter()
                .filter(|v| v.level == threat_level)
                .map(|v| 1.0 - v.confidence)
                .product();
            (1.0 - miss).clamp(0.0, 1.0)
        };

        // Hate speech is blocked unconditionally, independent of the ceiling
        // and of any caller verification state.
        let requires_complete_block = threat_level >= self.config.hard_block_ceiling
            || threat_level == ContentThreatLevel::HateSpeech;

        let requires_age_verification = matches!(
            threat_level,
            ContentThreatLevel::AdultContent | ContentThreatLevel::NsfwExplicit
        );

        ContentAnalysisResult {
            content_type,
            threat_level,
            confidence,
            violations,
            requires_complete_block,
            requires_age_verification,
        }
    }
}
