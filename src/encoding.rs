//! Lossy legacy-encoding repair for inference responses.
//!
//! The inference backend occasionally hands back UTF-8 text that was decoded
//! as Latin-1 somewhere upstream, turning Spanish diacritics into two-char
//! junk (`"Â¿QuÃ© tal?"`). Repairing is a round-trip: re-encode the text as
//! Latin-1 bytes and decode those bytes as UTF-8. The repair only runs when
//! a mojibake marker is present and falls back to the original text whenever
//! the round-trip is impossible, so well-formed input passes through
//! untouched.

/// Repair double-decoded UTF-8 text. Returns the input unchanged when it
/// shows no sign of mojibake or cannot be round-tripped through Latin-1.
#[must_use]
pub fn repair_mojibake(text: &str) -> String {
    // 'Ã' and 'Â' are the lead bytes of UTF-8 two-byte sequences as seen
    // through a Latin-1 lens; clean Spanish text never contains them.
    if !text.contains('Ã') && !text.contains('Â') {
        return text.to_owned();
    }

    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let cp = u32::from(ch);
        if cp > 0xFF {
            // Not representable in Latin-1: this was never double-decoded.
            return text.to_owned();
        }
        #[allow(clippy::cast_possible_truncation)]
        bytes.push(cp as u8);
    }

    String::from_utf8(bytes).unwrap_or_else(|_| text.to_owned())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn repairs_spanish_diacritics() {
        assert_eq!(repair_mojibake("Â¿QuÃ© tal?"), "¿Qué tal?");
        assert_eq!(
            repair_mojibake("EstÃ¡ aquÃ­ el niÃ±o"),
            "Está aquí el niño"
        );
        assert_eq!(repair_mojibake("Ã±andÃº"), "ñandú");
    }

    #[test]
    fn clean_text_passes_through() {
        assert_eq!(repair_mojibake("Hola, ¿en qué puedo ayudarte?"), "Hola, ¿en qué puedo ayudarte?");
        assert_eq!(repair_mojibake("plain ascii"), "plain ascii");
    }

    #[test]
    fn non_latin1_text_is_left_alone() {
        // Contains a marker but also characters outside Latin-1, so the
        // round-trip is refused rather than corrupting the text.
        assert_eq!(repair_mojibake("Ã — ∑"), "Ã — ∑");
    }

    #[test]
    fn invalid_round_trip_is_left_alone() {
        // 'Ã' followed by ASCII does not form a valid UTF-8 sequence.
        assert_eq!(repair_mojibake("Ãx"), "Ãx");
    }
}
