//! Reversible content scrambling
//!
//! Applies the pattern recipe in order: chunk split, optional chunk-order
//! reversal, byte rotation, optional XOR overlay. Every step is a bijection
//! for a fixed pattern, so `descramble(scramble(p)) == p` always holds.
//!
//! This is obfuscation, not encryption: an observer of many sessions could
//! infer the derivation function. Callers must not treat scrambled output as
//! confidential; the privileged plaintext store uses `crypto` for that.

use crate::pattern::ScramblePattern;
use crate::{Result, ShroudError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Applies and reverses scramble patterns against text, markup, and binary
/// payloads.
pub struct ContentScrambler;

impl ContentScrambler {
    /// Scramble a raw byte buffer.
    pub fn scramble_bytes(payload: &[u8], pattern: &ScramblePattern) -> Vec<u8> {
        let lengths = chunk_lengths(&pattern.chunk_profile, payload.len());
        let mut out = reorder_chunks(payload, &lengths, pattern.reverse_chunks, false);
        rotate(&mut out, pattern.rotation_factor);
        if pattern.xor_overlay {
            xor_overlay(&mut out, pattern.xor_seed);
        }
        out
    }

    /// Exact inverse of [`ContentScrambler::scramble_bytes`].
    pub fn descramble_bytes(payload: &[u8], pattern: &ScramblePattern) -> Vec<u8> {
        let mut buf = payload.to_vec();
        if pattern.xor_overlay {
            xor_overlay(&mut buf, pattern.xor_seed);
        }
        unrotate(&mut buf, pattern.rotation_factor);
        let lengths = chunk_lengths(&pattern.chunk_profile, buf.len());
        reorder_chunks(&buf, &lengths, pattern.reverse_chunks, true)
    }

    /// Scramble text. Chunk boundaries are computed in characters, so a cut
    /// can never land inside a multi-byte character.
    pub fn scramble_text(text: &str, pattern: &ScramblePattern) -> Vec<u8> {
        let char_count = text.chars().count();
        let lengths = chunk_lengths(&pattern.chunk_profile, char_count);
        let byte_spans = char_chunk_spans(text, &lengths);

        let mut out = Vec::with_capacity(text.len());
        if pattern.reverse_chunks {
            for &(start, end) in byte_spans.iter().rev() {
                out.extend_from_slice(&text.as_bytes()[start..end]);
            }
        } else {
            out.extend_from_slice(text.as_bytes());
        }

        rotate(&mut out, pattern.rotation_factor);
        if pattern.xor_overlay {
            xor_overlay(&mut out, pattern.xor_seed);
        }
        out
    }

    /// Exact inverse of [`ContentScrambler::scramble_text`].
    ///
    /// Fails with `MalformedChunking` if the payload does not descramble to
    /// well-formed UTF-8 (wrong pattern or corrupted payload).
    pub fn descramble_text(payload: &[u8], pattern: &ScramblePattern) -> Result<String> {
        let mut buf = payload.to_vec();
        if pattern.xor_overlay {
            xor_overlay(&mut buf, pattern.xor_seed);
        }
        unrotate(&mut buf, pattern.rotation_factor);

        // Chunk reordering permutes whole char-aligned chunks, so the
        // intermediate buffer must itself be valid UTF-8.
        let reordered = String::from_utf8(buf).map_err(|_| {
            ShroudError::MalformedChunking("descrambled payload is not valid UTF-8".into())
        })?;

        if !pattern.reverse_chunks {
            return Ok(reordered);
        }

        let char_count = reordered.chars().count();
        let mut lengths = chunk_lengths(&pattern.chunk_profile, char_count);
        lengths.reverse();
        let spans = char_chunk_spans(&reordered, &lengths);

        let mut out = String::with_capacity(reordered.len());
        for &(start, end) in spans.iter().rev() {
            out.push_str(&reordered[start..end]);
        }
        Ok(out)
    }

    /// Scramble markup with caller-declared byte boundaries (e.g. cuts placed
    /// between tags). Boundaries must be strictly increasing, in range, and
    /// on character boundaries; anything else is `MalformedChunking` and no
    /// partial output is ever produced.
    pub fn scramble_with_boundaries(
        text: &str,
        pattern: &ScramblePattern,
        boundaries: &[usize],
    ) -> Result<Vec<u8>> {
        validate_boundaries(text, boundaries)?;

        let lengths = boundary_lengths(boundaries, text.len());
        let mut out = reorder_chunks(text.as_bytes(), &lengths, pattern.reverse_chunks, false);
        rotate(&mut out, pattern.rotation_factor);
        if pattern.xor_overlay {
            xor_overlay(&mut out, pattern.xor_seed);
        }
        Ok(out)
    }

    /// Exact inverse of [`ContentScrambler::scramble_with_boundaries`]; the
    /// caller supplies the same declared boundaries.
    pub fn descramble_with_boundaries(
        payload: &[u8],
        pattern: &ScramblePattern,
        boundaries: &[usize],
    ) -> Result<String> {
        let mut buf = payload.to_vec();
        if pattern.xor_overlay {
            xor_overlay(&mut buf, pattern.xor_seed);
        }
        unrotate(&mut buf, pattern.rotation_factor);

        // Same strictly-increasing validation as the scramble side; the
        // char-boundary check waits until the text is decoded.
        let mut prev = 0;
        for &b in boundaries {
            if b == 0 || b >= buf.len() {
                return Err(ShroudError::MalformedChunking(format!(
                    "boundary {} out of range for payload of {} bytes",
                    b,
                    buf.len()
                )));
            }
            if b <= prev {
                return Err(ShroudError::MalformedChunking(format!(
                    "boundaries not strictly increasing at {}",
                    b
                )));
            }
            prev = b;
        }

        let lengths = boundary_lengths(boundaries, buf.len());
        let restored = reorder_chunks(&buf, &lengths, pattern.reverse_chunks, true);
        String::from_utf8(restored).map_err(|_| {
            ShroudError::MalformedChunking("descrambled markup is not valid UTF-8".into())
        })
    }
}

/// Cycle the pattern's chunk profile until it covers `total` units.
fn chunk_lengths(profile: &[usize], total: usize) -> Vec<usize> {
    let mut lengths = Vec::new();
    let mut covered = 0;
    let mut i = 0;
    while covered < total {
        let len = profile[i % profile.len()].min(total - covered);
        lengths.push(len);
        covered += len;
        i += 1;
    }
    lengths
}

/// Split `payload` into chunks of `lengths` and optionally reverse the chunk
/// order. `undo` reverses a previously applied reversal.
fn reorder_chunks(payload: &[u8], lengths: &[usize], reverse: bool, undo: bool) -> Vec<u8> {
    if !reverse {
        return payload.to_vec();
    }

    let effective: Vec<usize> = if undo {
        // Scrambling emitted chunks in reverse, so the buffer is cut by the
        // reversed length list before restoring order.
        lengths.iter().rev().copied().collect()
    } else {
        lengths.to_vec()
    };

    let mut chunks = Vec::with_capacity(effective.len());
    let mut offset = 0;
    for &len in &effective {
        chunks.push(&payload[offset..offset + len]);
        offset += len;
    }

    let mut out = Vec::with_capacity(payload.len());
    for chunk in chunks.into_iter().rev() {
        out.extend_from_slice(chunk);
    }
    out
}

/// Byte spans covering chunks of `lengths` characters each.
fn char_chunk_spans(text: &str, lengths: &[usize]) -> Vec<(usize, usize)> {
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    offsets.push(text.len());

    let mut spans = Vec::with_capacity(lengths.len());
    let mut char_pos = 0;
    for &len in lengths {
        let start = offsets[char_pos];
        let end = offsets[char_pos + len];
        spans.push((start, end));
        char_pos += len;
    }
    spans
}

fn boundary_lengths(boundaries: &[usize], total: usize) -> Vec<usize> {
    let mut lengths = Vec::with_capacity(boundaries.len() + 1);
    let mut prev = 0;
    for &b in boundaries {
        lengths.push(b - prev);
        prev = b;
    }
    lengths.push(total - prev);
    lengths
}

fn validate_boundaries(text: &str, boundaries: &[usize]) -> Result<()> {
    let mut prev = 0;
    for &b in boundaries {
        if b == 0 || b >= text.len() {
            return Err(ShroudError::MalformedChunking(format!(
                "boundary {} out of range for {} bytes",
                b,
                text.len()
            )));
        }
        if b <= prev {
            return Err(ShroudError::MalformedChunking(format!(
                "boundaries not strictly increasing at {}",
                b
            )));
        }
        if !text.is_char_boundary(b) {
            return Err(ShroudError::MalformedChunking(format!(
                "boundary {} splits a multi-byte character",
                b
            )));
        }
        prev = b;
    }
    Ok(())
}

fn rotate(buf: &mut [u8], factor: u8) {
    for b in buf.iter_mut() {
        *b = b.wrapping_add(factor);
    }
}

fn unrotate(buf: &mut [u8], factor: u8) {
    for b in buf.iter_mut() {
        *b = b.wrapping_sub(factor);
    }
}

/// XOR with a keystream derived from the pattern seed. Self-inverse.
fn xor_overlay(buf: &mut [u8], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for b in buf.iter_mut() {
        *b ^= rng.random::<u8>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::ScramblePatternEngine;

    fn pattern() -> ScramblePattern {
        ScramblePatternEngine::derive(&[3u8; 32], 11, 0)
    }

    #[test]
    fn bytes_round_trip() {
        let pattern = pattern();
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let scrambled = ContentScrambler::scramble_bytes(&payload, &pattern);
        assert_ne!(scrambled, payload);
        assert_eq!(
            ContentScrambler::descramble_bytes(&scrambled, &pattern),
            payload
        );
    }

    #[test]
    fn text_round_trip_multibyte() {
        let pattern = pattern();
        let text = "naïve déjà-vu — 訓読み mixed with plain ASCII, emoji 🦀 and more";
        let scrambled = ContentScrambler::scramble_text(text, &pattern);
        assert_eq!(
            ContentScrambler::descramble_text(&scrambled, &pattern).unwrap(),
            text
        );
    }

    #[test]
    fn empty_payload_round_trips() {
        let pattern = pattern();
        assert!(ContentScrambler::scramble_bytes(&[], &pattern).is_empty());
        assert_eq!(
            ContentScrambler::descramble_text(
                &ContentScrambler::scramble_text("", &pattern),
                &pattern
            )
            .unwrap(),
            ""
        );
    }

    #[test]
    fn declared_boundary_inside_char_rejected() {
        let pattern = pattern();
        let text = "héllo wörld";
        // Byte 2 lands inside 'é'.
        let err = ContentScrambler::scramble_with_boundaries(text, &pattern, &[2]).unwrap_err();
        assert!(matches!(err, ShroudError::MalformedChunking(_)));
    }

    #[test]
    fn declared_boundaries_must_increase() {
        let pattern = pattern();
        let err =
            ContentScrambler::scramble_with_boundaries("abcdef", &pattern, &[4, 4]).unwrap_err();
        assert!(matches!(err, ShroudError::MalformedChunking(_)));
    }

    #[test]
    fn descramble_rejects_non_increasing_boundaries() {
        let pattern = pattern();
        let err = ContentScrambler::descramble_with_boundaries(&[0u8; 16], &pattern, &[8, 4])
            .unwrap_err();
        assert!(matches!(err, ShroudError::MalformedChunking(_)));

        let err = ContentScrambler::descramble_with_boundaries(&[0u8; 16], &pattern, &[4, 4])
            .unwrap_err();
        assert!(matches!(err, ShroudError::MalformedChunking(_)));
    }

    #[test]
    fn declared_boundary_round_trip() {
        let pattern = pattern();
        let markup = "<p>héllo</p><div>wörld</div>";
        let boundaries = [markup.find("<div>").unwrap()];
        let scrambled =
            ContentScrambler::scramble_with_boundaries(markup, &pattern, &boundaries).unwrap();
        let restored =
            ContentScrambler::descramble_with_boundaries(&scrambled, &pattern, &boundaries)
                .unwrap();
        assert_eq!(restored, markup);
    }

    #[test]
    fn wrong_pattern_fails_or_differs() {
        let p0 = ScramblePatternEngine::derive(&[3u8; 32], 11, 0);
        let p1 = ScramblePatternEngine::derive(&[3u8; 32], 11, 1);
        let text = "the quick brown fox jumps over the lazy dog";
        let scrambled = ContentScrambler::scramble_text(text, &p0);
        match ContentScrambler::descramble_text(&scrambled, &p1) {
            Ok(decoded) => assert_ne!(decoded, text),
            Err(e) => assert!(matches!(e, ShroudError::MalformedChunking(_))),
        }
    }
}
