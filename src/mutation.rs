//! Threat-adaptive content mutation
//!
//! Turns a risk verdict plus caller policy into a concrete, boundedly
//! destructive transformation. Selection is pure; application takes all
//! randomness from a caller-supplied seed so outcomes are reproducible.

use crate::analyzer::{ContentAnalysisResult, ContentThreatLevel};
use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Caller verification / permission state consulted during selection.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub age_verified: bool,
    pub admin_override: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MutationStrength {
    Low,
    Medium,
    High,
}

/// The transformation applied before content is scrambled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationPlan {
    NoMutation,
    CompleteRedaction,
    NoiseInjection(MutationStrength),
    BlurOrPixelate {
        strength: MutationStrength,
        remove_sentences: bool,
    },
    WordSubstitution,
}

/// Terms masked by `WordSubstitution` and sentence removal.
static FLAGGED_TERMS: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "bullshit",
            "goddamn",
            "asshole",
            "motherfucker",
            "explicit nudity",
            "xxx rated",
            "softcore",
        ])
        .expect("flagged-term matcher")
});

const REDACTION_MARKER: &str = "[CONTENT REMOVED BY POLICY]";

/// Maps risk verdicts to mutation plans.
pub struct MutationStrategySelector;

impl MutationStrategySelector {
    /// Decision table, evaluated top-down, first match wins.
    pub fn select(analysis: &ContentAnalysisResult, policy: &PolicyContext) -> MutationPlan {
        // Hate speech redacts unconditionally, admin override included.
        if analysis.threat_level == ContentThreatLevel::HateSpeech {
            return MutationPlan::CompleteRedaction;
        }

        if analysis.requires_complete_block && !policy.admin_override {
            return MutationPlan::CompleteRedaction;
        }

        if analysis.requires_age_verification && !policy.age_verified {
            return MutationPlan::CompleteRedaction;
        }

        match analysis.threat_level {
            ContentThreatLevel::Suspicious => MutationPlan::NoiseInjection(MutationStrength::Low),
            ContentThreatLevel::AdultContent => MutationPlan::BlurOrPixelate {
                strength: MutationStrength::Medium,
                remove_sentences: false,
            },
            ContentThreatLevel::NsfwExplicit => MutationPlan::BlurOrPixelate {
                strength: MutationStrength::High,
                remove_sentences: true,
            },
            ContentThreatLevel::Profanity => MutationPlan::WordSubstitution,
            _ => MutationPlan::NoMutation,
        }
    }

    /// Apply a plan. Deterministic given `noise_seed`.
    pub fn apply(plan: &MutationPlan, content: &str, noise_seed: u64) -> String {
        match plan {
            MutationPlan::NoMutation => content.to_string(),
            MutationPlan::CompleteRedaction => REDACTION_MARKER.to_string(),
            MutationPlan::NoiseInjection(strength) => inject_noise(content, *strength, noise_seed),
            MutationPlan::BlurOrPixelate {
                strength,
                remove_sentences,
            } => {
                let base = if *remove_sentences {
                    remove_flagged_sentences(content)
                } else {
                    content.to_string()
                };
                pixelate(&base, *strength, noise_seed)
            }
            MutationPlan::WordSubstitution => substitute_words(content),
        }
    }
}

/// Sprinkle zero-width spaces between words. Visually inert but breaks
/// naive scraping of the plaintext.
fn inject_noise(content: &str, strength: MutationStrength, seed: u64) -> String {
    let probability = match strength {
        MutationStrength::Low => 0.1,
        MutationStrength::Medium => 0.25,
        MutationStrength::High => 0.5,
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = String::with_capacity(content.len() + content.len() / 8);
    for ch in content.chars() {
        out.push(ch);
        if ch.is_whitespace() && rng.random_bool(probability) {
            out.push('\u{200B}');
        }
    }
    out
}

/// Replace a strength-dependent share of word characters with block glyphs.
fn pixelate(content: &str, strength: MutationStrength, seed: u64) -> String {
    let share = match strength {
        MutationStrength::Low => 0.2,
        MutationStrength::Medium => 0.5,
        MutationStrength::High => 0.8,
    };

    let mut rng = StdRng::seed_from_u64(seed);
    content
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() && rng.random_bool(share) {
                '▒'
            } else {
                ch
            }
        })
        .collect()
}

/// Drop sentences containing flagged terms entirely.
fn remove_flagged_sentences(content: &str) -> String {
    content
        .split_inclusive(['.', '!', '?'])
        .filter(|sentence| !FLAGGED_TERMS.is_match(sentence))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Mask flagged terms with asterisks, preserving length.
fn substitute_words(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for hit in FLAGGED_TERMS.find_iter(content) {
        out.push_str(&content[last..hit.start()]);
        out.extend(std::iter::repeat('*').take(hit.end() - hit.start()));
        last = hit.end();
    }
    out.push_str(&content[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ContentType;

    fn verdict(level: ContentThreatLevel) -> ContentAnalysisResult {
        ContentAnalysisResult {
            content_type: ContentType::Text,
            threat_level: level,
            confidence: 0.9,
            violations: vec![],
            requires_complete_block: level >= ContentThreatLevel::HateSpeech,
            requires_age_verification: matches!(
                level,
                ContentThreatLevel::AdultContent | ContentThreatLevel::NsfwExplicit
            ),
        }
    }

    #[test]
    fn safe_content_untouched() {
        let plan = MutationStrategySelector::select(
            &verdict(ContentThreatLevel::Safe),
            &PolicyContext::default(),
        );
        assert_eq!(plan, MutationPlan::NoMutation);
        assert_eq!(
            MutationStrategySelector::apply(&plan, "hello world", 1),
            "hello world"
        );
    }

    #[test]
    fn hate_speech_not_overridable() {
        let policy = PolicyContext {
            age_verified: true,
            admin_override: true,
        };
        let plan =
            MutationStrategySelector::select(&verdict(ContentThreatLevel::HateSpeech), &policy);
        assert_eq!(plan, MutationPlan::CompleteRedaction);
    }

    #[test]
    fn admin_override_lifts_critical_block() {
        let mut analysis = verdict(ContentThreatLevel::CriticalViolation);
        analysis.requires_complete_block = true;

        let blocked =
            MutationStrategySelector::select(&analysis, &PolicyContext::default());
        assert_eq!(blocked, MutationPlan::CompleteRedaction);

        let policy = PolicyContext {
            admin_override: true,
            ..Default::default()
        };
        let lifted = MutationStrategySelector::select(&analysis, &policy);
        assert_ne!(lifted, MutationPlan::CompleteRedaction);
    }

    #[test]
    fn unverified_adult_content_redacted() {
        let plan = MutationStrategySelector::select(
            &verdict(ContentThreatLevel::AdultContent),
            &PolicyContext::default(),
        );
        assert_eq!(plan, MutationPlan::CompleteRedaction);

        let policy = PolicyContext {
            age_verified: true,
            ..Default::default()
        };
        let plan = MutationStrategySelector::select(&verdict(ContentThreatLevel::AdultContent), &policy);
        assert_eq!(
            plan,
            MutationPlan::BlurOrPixelate {
                strength: MutationStrength::Medium,
                remove_sentences: false,
            }
        );
    }

    #[test]
    fn unverified_nsfw_redacted() {
        let plan = MutationStrategySelector::select(
            &verdict(ContentThreatLevel::NsfwExplicit),
            &PolicyContext::default(),
        );
        assert_eq!(plan, MutationPlan::CompleteRedaction);

        let policy = PolicyContext {
            age_verified: true,
            ..Default::default()
        };
        let plan =
            MutationStrategySelector::select(&verdict(ContentThreatLevel::NsfwExplicit), &policy);
        assert_eq!(
            plan,
            MutationPlan::BlurOrPixelate {
                strength: MutationStrength::High,
                remove_sentences: true,
            }
        );
    }

    #[test]
    fn profanity_gets_word_substitution() {
        let plan = MutationStrategySelector::select(
            &verdict(ContentThreatLevel::Profanity),
            &PolicyContext::default(),
        );
        assert_eq!(plan, MutationPlan::WordSubstitution);

        let masked = MutationStrategySelector::apply(&plan, "that is bullshit, frankly", 1);
        assert!(!masked.to_lowercase().contains("bullshit"));
        assert!(masked.contains("********"));
        assert!(masked.contains("frankly"));
    }

    #[test]
    fn noise_injection_is_deterministic() {
        let plan = MutationPlan::NoiseInjection(MutationStrength::Low);
        let a = MutationStrategySelector::apply(&plan, "some suspicious text here", 42);
        let b = MutationStrategySelector::apply(&plan, "some suspicious text here", 42);
        assert_eq!(a, b);
        // Stripping the injected noise recovers the original.
        assert_eq!(a.replace('\u{200B}', ""), "some suspicious text here");
    }

    #[test]
    fn sentence_removal_drops_flagged_sentences() {
        let text = "A fine sentence. Contains xxx rated material! Another fine one.";
        let out = remove_flagged_sentences(text);
        assert!(out.contains("A fine sentence."));
        assert!(!out.contains("xxx"));
        assert!(out.contains("Another fine one."));
    }
}
