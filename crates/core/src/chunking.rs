//! Chunking engine: split an oversized input into bounded windows and
//! reassemble chunk outputs into one coherent, ordered result.
//!
//! Splitting and reassembly are pure functions over slice ranges and
//! timestamped spans; the engine crate feeds them real media extents and
//! capability outputs.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::{JobKind, SliceRange};

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// Tunable chunking policy. Units follow the source extent (bytes for raw
/// media, milliseconds for decoded audio); the planner only compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Inputs at or below this extent stay a single chunk.
    pub threshold: u64,
    /// Fixed window size for split inputs.
    pub window: u64,
    /// Overlap carried into each subsequent window for kinds that must not
    /// cut mid-utterance (diarize, translate).
    pub overlap: u64,
}

impl ChunkPolicy {
    pub fn new(threshold: u64, window: u64, overlap: u64) -> Self {
        debug_assert!(window > 0, "window must be positive");
        debug_assert!(overlap < window, "overlap must be smaller than the window");
        Self {
            threshold,
            window,
            overlap,
        }
    }
}

/// Plan the chunk windows for an input of the given extent.
///
/// - Kinds that are not chunking-eligible, and inputs at or below the
///   threshold, yield a single window covering the whole input.
/// - Otherwise the input is cut into fixed windows of `policy.window`;
///   for overlapping kinds every window after the first starts
///   `policy.overlap` early.
///
/// Windows are returned in `sequence_index` order and always cover the
/// full extent with no gaps.
pub fn plan_chunks(kind: JobKind, extent: u64, policy: &ChunkPolicy) -> Vec<SliceRange> {
    if extent == 0 {
        return vec![SliceRange::new(0, 0)];
    }
    if !kind.chunking_eligible() || extent <= policy.threshold {
        return vec![SliceRange::new(0, extent)];
    }

    let overlap = if kind.overlapping_windows() {
        policy.overlap
    } else {
        0
    };

    let count = extent.div_ceil(policy.window);
    let mut windows = Vec::with_capacity(count as usize);
    for i in 0..count {
        let nominal_start = i * policy.window;
        let start = if i > 0 {
            nominal_start.saturating_sub(overlap)
        } else {
            0
        };
        let end = (nominal_start + policy.window).min(extent);
        windows.push(SliceRange::new(start, end));
    }
    windows
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// One timestamped span of a chunk's output (a transcript line, a speaker
/// turn). `payload` is opaque to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
    pub payload: serde_json::Value,
}

/// The decoded output of one chunk, keyed by its sequence index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutput {
    pub sequence_index: u32,
    pub spans: Vec<Span>,
}

/// Verify that outputs for indices `0..expected` are all present, exactly
/// once each. A missing slot fails with `IncompleteChunks` naming the
/// missing indices; a duplicate or out-of-range index fails with a
/// `Conflict` naming the offenders, since the output set disagrees with
/// the plan rather than merely lagging it.
pub fn ensure_complete(expected: u32, outputs: &[ChunkOutput]) -> Result<(), CoreError> {
    let mut seen = vec![false; expected as usize];
    let mut duplicate: Vec<u32> = Vec::new();
    let mut out_of_range: Vec<u32> = Vec::new();
    for out in outputs {
        match seen.get_mut(out.sequence_index as usize) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => duplicate.push(out.sequence_index),
            None => out_of_range.push(out.sequence_index),
        }
    }
    let missing: Vec<u32> = seen
        .iter()
        .enumerate()
        .filter(|(_, present)| !**present)
        .map(|(i, _)| i as u32)
        .collect();
    if !missing.is_empty() {
        return Err(CoreError::IncompleteChunks { missing });
    }
    if !duplicate.is_empty() || !out_of_range.is_empty() {
        return Err(CoreError::Conflict(format!(
            "chunk outputs disagree with the plan of {expected}: \
             duplicate indices {duplicate:?}, out-of-range indices {out_of_range:?}"
        )));
    }
    Ok(())
}

/// Merge chunk outputs into a single ordered span sequence.
///
/// Chunks merge strictly by `sequence_index`. Overlap regions are
/// deduplicated with a running watermark: a span is kept only if it starts
/// at or after the end of the last kept span, so the earlier chunk's
/// trailing boundary wins and, on an exact timestamp collision, the
/// earlier `sequence_index` wins because it is merged first.
///
/// Fails with `IncompleteChunks` if any of the `expected` outputs is
/// missing — partial data is never silently reassembled.
pub fn reassemble(expected: u32, mut outputs: Vec<ChunkOutput>) -> Result<Vec<Span>, CoreError> {
    ensure_complete(expected, &outputs)?;

    outputs.sort_by_key(|o| o.sequence_index);

    let mut merged: Vec<Span> = Vec::new();
    let mut watermark: u64 = 0;
    for output in outputs {
        let mut spans = output.spans;
        spans.sort_by_key(|s| (s.start, s.end));
        for span in spans {
            if merged.is_empty() || span.start >= watermark {
                watermark = span.end;
                merged.push(span);
            }
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const MB: u64 = 1024 * 1024;

    fn policy() -> ChunkPolicy {
        ChunkPolicy::new(100 * MB, 100 * MB, 2 * MB)
    }

    fn span(start: u64, end: u64, text: &str) -> Span {
        Span {
            start,
            end,
            payload: serde_json::json!(text),
        }
    }

    #[test]
    fn small_input_is_a_single_window() {
        let windows = plan_chunks(JobKind::Translate, 50 * MB, &policy());
        assert_eq!(windows, vec![SliceRange::new(0, 50 * MB)]);
    }

    #[test]
    fn voice_clone_never_splits() {
        let windows = plan_chunks(JobKind::VoiceClone, 10_000 * MB, &policy());
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0], SliceRange::new(0, 10_000 * MB));
    }

    #[test]
    fn gigabyte_input_yields_ten_windows() {
        // 1 GiB input, 100 MiB windows -> sequence indices 0..=9.
        let extent = 1000 * MB;
        let windows = plan_chunks(JobKind::Translate, extent, &policy());
        assert_eq!(windows.len(), 10);
        assert_eq!(windows[0], SliceRange::new(0, 100 * MB));
        // Later windows start `overlap` early.
        assert_eq!(windows[1].start, 100 * MB - 2 * MB);
        assert_eq!(windows[9].end, extent);
        // Full coverage, no gaps.
        for pair in windows.windows(2) {
            assert!(pair[1].start < pair[0].end);
        }
    }

    #[test]
    fn extract_speakers_splits_without_overlap() {
        let windows = plan_chunks(JobKind::ExtractSpeakers, 250 * MB, &policy());
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].start, 100 * MB);
        assert_eq!(windows[2], SliceRange::new(200 * MB, 250 * MB));
    }

    #[test]
    fn ragged_tail_window_is_shorter() {
        let windows = plan_chunks(JobKind::Diarize, 101 * MB, &policy());
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].end, 101 * MB);
        assert!(windows[1].len() < windows[0].len());
    }

    #[test]
    fn reassembly_orders_by_sequence_index_not_arrival() {
        // Outputs arrive in completion order 2, 0, 1.
        let outputs = vec![
            ChunkOutput {
                sequence_index: 2,
                spans: vec![span(200, 250, "c")],
            },
            ChunkOutput {
                sequence_index: 0,
                spans: vec![span(0, 90, "a")],
            },
            ChunkOutput {
                sequence_index: 1,
                spans: vec![span(100, 190, "b")],
            },
        ];
        let merged = reassemble(3, outputs).unwrap();
        let texts: Vec<&str> = merged.iter().map(|s| s.payload.as_str().unwrap()).collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn overlap_region_prefers_earlier_chunk() {
        // Chunk 0 covers [0, 100); chunk 1 starts at 90 and re-emits the
        // utterance at 85..95 that chunk 0 already produced.
        let outputs = vec![
            ChunkOutput {
                sequence_index: 0,
                spans: vec![span(0, 80, "first"), span(85, 95, "boundary")],
            },
            ChunkOutput {
                sequence_index: 1,
                spans: vec![span(90, 95, "boundary-dup"), span(95, 120, "second")],
            },
        ];
        let merged = reassemble(2, outputs).unwrap();
        let texts: Vec<&str> = merged.iter().map(|s| s.payload.as_str().unwrap()).collect();
        assert_eq!(texts, ["first", "boundary", "second"]);
    }

    #[test]
    fn exact_collision_keeps_earlier_sequence_index() {
        let outputs = vec![
            ChunkOutput {
                sequence_index: 0,
                spans: vec![span(50, 60, "early")],
            },
            ChunkOutput {
                sequence_index: 1,
                spans: vec![span(50, 60, "late")],
            },
        ];
        let merged = reassemble(2, outputs).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].payload, serde_json::json!("early"));
    }

    #[test]
    fn missing_chunk_output_fails_reassembly() {
        let outputs = vec![
            ChunkOutput {
                sequence_index: 0,
                spans: vec![span(0, 10, "a")],
            },
            ChunkOutput {
                sequence_index: 2,
                spans: vec![span(20, 30, "c")],
            },
        ];
        let err = reassemble(3, outputs).unwrap_err();
        assert_matches!(err, CoreError::IncompleteChunks { missing } if missing == vec![1]);
    }

    #[test]
    fn empty_output_set_fails_when_chunks_expected() {
        let err = reassemble(2, Vec::new()).unwrap_err();
        assert_matches!(err, CoreError::IncompleteChunks { missing } if missing == vec![0, 1]);
    }

    #[test]
    fn duplicate_output_index_is_named_in_the_error() {
        let outputs = vec![
            ChunkOutput {
                sequence_index: 0,
                spans: vec![span(0, 10, "a")],
            },
            ChunkOutput {
                sequence_index: 1,
                spans: vec![span(10, 20, "b")],
            },
            ChunkOutput {
                sequence_index: 1,
                spans: vec![span(10, 20, "b-again")],
            },
        ];
        let err = reassemble(2, outputs).unwrap_err();
        assert_matches!(err, CoreError::Conflict(msg) if msg.contains("duplicate indices [1]"));
    }

    #[test]
    fn out_of_range_output_index_is_named_in_the_error() {
        let outputs = vec![
            ChunkOutput {
                sequence_index: 0,
                spans: vec![span(0, 10, "a")],
            },
            ChunkOutput {
                sequence_index: 1,
                spans: vec![span(10, 20, "b")],
            },
            ChunkOutput {
                sequence_index: 7,
                spans: vec![span(70, 80, "stray")],
            },
        ];
        let err = reassemble(2, outputs).unwrap_err();
        assert_matches!(err, CoreError::Conflict(msg) if msg.contains("out-of-range indices [7]"));
    }
}
