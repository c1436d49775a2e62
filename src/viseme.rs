//! Coarse mouth-cue estimation for avatar lip-sync.
//!
//! The playback renderer animates the avatar's mouth from a cue track
//! attached to each spoken message. Cues are estimated from the segment
//! text alone (no audio analysis): vowels map to open mouth shapes,
//! consonant runs to a near-closed shape, and word boundaries to silence.
//! Timing uses the same per-character pacing as the playback fallback
//! timer, so the track roughly spans the audio duration.

use serde::Serialize;

/// Visual mouth shapes the renderer knows how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouthShape {
    /// Mouth at rest (silence, word boundaries).
    Sil,
    /// Wide open (a-like vowels).
    Open,
    /// Spread (e/i-like vowels).
    Wide,
    /// Rounded (o/u-like vowels).
    Rounded,
    /// Near-closed (consonants).
    Closed,
}

/// One lip-sync cue: a shape held for a span of the audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MouthCue {
    /// Shape to display.
    pub shape: MouthShape,
    /// Offset from the start of the segment audio, in milliseconds.
    pub start_ms: u64,
    /// How long to hold the shape, in milliseconds.
    pub duration_ms: u64,
}

fn char_shape(ch: char) -> MouthShape {
    match ch.to_lowercase().next().unwrap_or(ch) {
        'a' | 'á' => MouthShape::Open,
        'e' | 'é' | 'i' | 'í' | 'y' => MouthShape::Wide,
        'o' | 'ó' | 'u' | 'ú' | 'ü' => MouthShape::Rounded,
        c if c.is_alphabetic() => MouthShape::Closed,
        _ => MouthShape::Sil,
    }
}

/// Estimate a mouth-cue track for `text` at `per_char_ms` pacing.
///
/// Consecutive characters with the same shape merge into one cue; the track
/// always ends on [`MouthShape::Sil`] so the mouth closes when audio stops.
#[must_use]
pub fn estimate_cues(text: &str, per_char_ms: u64) -> Vec<MouthCue> {
    let per_char_ms = per_char_ms.max(1);
    let mut cues: Vec<MouthCue> = Vec::new();
    let mut clock_ms = 0u64;

    for ch in text.chars() {
        let shape = char_shape(ch);
        match cues.last_mut() {
            Some(last) if last.shape == shape => last.duration_ms += per_char_ms,
            _ => cues.push(MouthCue {
                shape,
                start_ms: clock_ms,
                duration_ms: per_char_ms,
            }),
        }
        clock_ms += per_char_ms;
    }

    if !matches!(cues.last().map(|c| c.shape), Some(MouthShape::Sil)) {
        cues.push(MouthCue {
            shape: MouthShape::Sil,
            start_ms: clock_ms,
            duration_ms: per_char_ms,
        });
    }

    cues
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn cues_cover_the_text_in_order() {
        let cues = estimate_cues("hola", 80);
        assert_eq!(cues.first().unwrap().start_ms, 0);
        for pair in cues.windows(2) {
            assert_eq!(pair[0].start_ms + pair[0].duration_ms, pair[1].start_ms);
        }
    }

    #[test]
    fn runs_of_one_shape_merge() {
        // "mm" is a single Closed cue spanning two characters.
        let cues = estimate_cues("mma", 50);
        assert_eq!(cues[0].shape, MouthShape::Closed);
        assert_eq!(cues[0].duration_ms, 100);
        assert_eq!(cues[1].shape, MouthShape::Open);
    }

    #[test]
    fn track_ends_closed() {
        let cues = estimate_cues("sí", 80);
        assert_eq!(cues.last().unwrap().shape, MouthShape::Sil);
    }

    #[test]
    fn spanish_vowels_map_to_shapes() {
        assert_eq!(char_shape('á'), MouthShape::Open);
        assert_eq!(char_shape('é'), MouthShape::Wide);
        assert_eq!(char_shape('ú'), MouthShape::Rounded);
        assert_eq!(char_shape('ñ'), MouthShape::Closed);
        assert_eq!(char_shape('¿'), MouthShape::Sil);
    }

    #[test]
    fn empty_text_still_closes_the_mouth() {
        let cues = estimate_cues("", 80);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].shape, MouthShape::Sil);
    }
}
