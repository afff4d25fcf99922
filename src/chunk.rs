//! Paragraph-boundary text chunker.
//!
//! Splits document text into segments no larger than `max_chunk_size`
//! bytes. Splitting happens on paragraph boundaries (`\n\n`); a paragraph
//! that is still too large is cut into consecutive fixed-size slices.
//!
//! # Algorithm
//!
//! 1. Split text on `\n\n` paragraph boundaries.
//! 2. Skip paragraphs that are empty or contain only whitespace.
//! 3. Emit each remaining paragraph verbatim if it fits.
//! 4. Otherwise slice it into pieces of at most `max_chunk_size` bytes,
//!    snapping each cut back to a UTF-8 character boundary.
//!
//! Segments never overlap and keep the original character order. The
//! chars-per-token ratio stored alongside the index is advisory only and
//! plays no part here.
//!
//! # Example
//!
//! ```rust
//! use docgrok::chunk::chunk_text;
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", 1024);
//! assert_eq!(chunks, vec!["Hello world.", "Second paragraph."]);
//! ```

/// Split text into segments on paragraph boundaries, respecting `max_chunk_size`.
///
/// # Guarantees
///
/// - No segment is empty or whitespace-only.
/// - No segment is longer than `max_chunk_size` bytes, unless a single
///   character is itself wider than the limit.
/// - Concatenating the slices of a paragraph reproduces the paragraph.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();

    for para in text.split("\n\n") {
        if para.trim().is_empty() {
            continue;
        }

        let mut remaining = para;
        while !remaining.is_empty() {
            let split_at = snap_to_char_boundary(remaining, remaining.len().min(max_chunk_size));
            let split_at = if split_at == 0 {
                remaining
                    .char_indices()
                    .nth(1)
                    .map(|(i, _)| i)
                    .unwrap_or(remaining.len())
            } else {
                split_at
            };
            chunks.push(remaining[..split_at].to_string());
            remaining = &remaining[split_at..];
        }
    }

    chunks
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 700);
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 700).is_empty());
        assert!(chunk_text("\n\n\n\n", 700).is_empty());
        assert!(chunk_text("  \n\n\t", 700).is_empty());
    }

    #[test]
    fn test_one_segment_per_paragraph() {
        let text = "First paragraph.\n\nSecond paragraph.\n\n\n\nThird paragraph.";
        let chunks = chunk_text(text, 700);
        assert_eq!(
            chunks,
            vec!["First paragraph.", "Second paragraph.", "Third paragraph."]
        );
    }

    #[test]
    fn test_paragraph_text_kept_verbatim() {
        let chunks = chunk_text("  indented\nline two \n\nnext", 700);
        assert_eq!(chunks[0], "  indented\nline two ");
    }

    #[test]
    fn test_long_paragraph_sliced_in_order() {
        let para = "abcdefghij".repeat(5);
        let chunks = chunk_text(&para, 16);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() <= 16));
        assert_eq!(chunks.concat(), para);
        assert_eq!(chunks[3].len(), 2);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = concat!(
            "┌──────────────────┐\n",
            "│ Hello world      │\n",
            "└──────────────────┘"
        );
        let chunks = chunk_text(text, 7);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.is_empty());
            assert!(c.len() <= 7);
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_limit_narrower_than_a_char_still_advances() {
        let chunks = chunk_text("ééé", 1);
        assert_eq!(chunks, vec!["é", "é", "é"]);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        assert_eq!(chunk_text(text, 3), chunk_text(text, 3));
    }
}
