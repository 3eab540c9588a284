//! Scramble pattern derivation and evolution

use crate::session::SessionToken;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Version tag for the chunk/rotate/xor recipe.
pub const ALGORITHM_ID: u32 = 1;

const PATTERN_DOMAIN: &[u8] = b"shroud/pattern/v1\n";

/// Per-session transformation recipe.
///
/// Deterministically reproducible from (device seed, session seed, evolution
/// counter) so the descrambling side never needs the pattern on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScramblePattern {
    pub algorithm_id: u32,
    /// Byte rotation amount, never zero.
    pub rotation_factor: u8,
    /// Chunk-boundary profile, cycled across a payload.
    pub chunk_profile: Vec<usize>,
    pub reverse_chunks: bool,
    pub xor_overlay: bool,
    pub xor_seed: u64,
    /// Monotonic evolution counter; also what keeps evolved patterns
    /// pairwise distinct without diffing history.
    pub evolution: u64,
}

/// Compact identifier recorded in audit entries instead of the full recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRef {
    pub algorithm_id: u32,
    pub evolution: u64,
}

impl ScramblePattern {
    pub fn as_ref(&self) -> PatternRef {
        PatternRef {
            algorithm_id: self.algorithm_id,
            evolution: self.evolution,
        }
    }
}

/// Configuration for pattern evolution cadence.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Evolve after this many admitted requests.
    pub evolve_every: u64,
    /// Evolve after this much session age per evolution step.
    pub evolve_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evolve_every: 100,
            evolve_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Derives and evolves per-session scramble patterns.
pub struct ScramblePatternEngine {
    config: EngineConfig,
}

impl Default for ScramblePatternEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ScramblePatternEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Deterministic, side-effect-free derivation. Same inputs, same pattern.
    pub fn derive(device_seed: &[u8; 32], session_seed: u64, evolution: u64) -> ScramblePattern {
        let mut hasher = Sha256::new();
        hasher.update(PATTERN_DOMAIN);
        hasher.update(device_seed);
        hasher.update(session_seed.to_le_bytes());
        hasher.update(evolution.to_le_bytes());
        let seed: [u8; 32] = hasher.finalize().into();

        let mut rng = StdRng::from_seed(seed);

        let rotation_factor = rng.random_range(1..=255u16) as u8;
        let profile_len = rng.random_range(3..=6usize);
        let chunk_profile = (0..profile_len)
            .map(|_| rng.random_range(8..=48usize))
            .collect();

        ScramblePattern {
            algorithm_id: ALGORITHM_ID,
            rotation_factor,
            chunk_profile,
            reverse_chunks: rng.random_bool(0.5),
            xor_overlay: rng.random_bool(0.75),
            xor_seed: rng.random::<u64>(),
            evolution,
        }
    }

    /// Whether the session has crossed a request-count multiple or an age
    /// interval since its pattern last evolved.
    pub fn should_evolve(&self, token: &SessionToken) -> bool {
        let by_count = token.request_counter / self.config.evolve_every > token.pattern.evolution;

        let age = Utc::now().signed_duration_since(token.created_at);
        let interval_ms = self.config.evolve_interval.as_millis() as i64;
        let by_age = interval_ms > 0
            && age.num_milliseconds() / interval_ms > token.pattern.evolution as i64;

        by_count || by_age
    }

    /// Re-derive at the next evolution counter. Monotonic: the counter only
    /// moves forward, so a session can never regress to an earlier pattern.
    pub fn evolve(
        device_seed: &[u8; 32],
        session_seed: u64,
        current: &ScramblePattern,
    ) -> ScramblePattern {
        Self::derive(device_seed, session_seed, current.evolution + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: [u8; 32] = [42u8; 32];

    #[test]
    fn derive_is_deterministic() {
        let a = ScramblePatternEngine::derive(&SEED, 7, 0);
        let b = ScramblePatternEngine::derive(&SEED, 7, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn derive_varies_with_inputs() {
        let base = ScramblePatternEngine::derive(&SEED, 7, 0);
        assert_ne!(base, ScramblePatternEngine::derive(&SEED, 8, 0));
        assert_ne!(base, ScramblePatternEngine::derive(&[1u8; 32], 7, 0));
    }

    #[test]
    fn rotation_never_zero() {
        for session_seed in 0..64 {
            let p = ScramblePatternEngine::derive(&SEED, session_seed, 0);
            assert_ne!(p.rotation_factor, 0);
            assert!(!p.chunk_profile.is_empty());
            assert!(p.chunk_profile.iter().all(|&len| len >= 8));
        }
    }

    #[test]
    fn evolution_produces_pairwise_distinct_patterns() {
        let mut patterns = vec![ScramblePatternEngine::derive(&SEED, 99, 0)];
        for _ in 0..8 {
            let next = ScramblePatternEngine::evolve(&SEED, 99, patterns.last().unwrap());
            patterns.push(next);
        }
        for i in 0..patterns.len() {
            for j in (i + 1)..patterns.len() {
                assert_ne!(patterns[i], patterns[j]);
            }
        }
    }
}
