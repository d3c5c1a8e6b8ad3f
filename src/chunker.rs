//! Fixed-size overlapping window chunking over page text.
//!
//! Both note extraction and vector-index ingestion run page text through
//! this splitter, each with its own size/overlap parameters, so it stays
//! pure: no state, no allocation beyond the window list, and windows
//! borrow from the input text.
//!
//! Offsets are measured in characters rather than bytes, so multi-byte
//! input is never split inside a code point.

/// Splits `text` into overlapping windows of at most `size` characters.
///
/// When `text` fits into a single window the whole text is returned as
/// one element. Otherwise the window advances by `size - overlap`
/// characters per step, and the final window is clipped to the end of
/// the text instead of overflowing past it.
///
/// An `overlap >= size` is clamped to `size - 1` so the window always
/// makes forward progress.
///
/// # Examples
///
/// ```
/// use pagesage::chunker::chunk;
///
/// let windows = chunk("abcdefghij", 4, 1);
/// assert_eq!(windows, vec!["abcd", "defg", "ghij"]);
///
/// assert_eq!(chunk("short", 100, 10), vec!["short"]);
/// ```
pub fn chunk(text: &str, size: usize, overlap: usize) -> Vec<&str> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;

    if size == 0 || total <= size {
        return vec![text];
    }

    let overlap = overlap.min(size - 1);
    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(total);
        windows.push(&text[bounds[start]..bounds[end]]);
        if end >= total {
            break;
        }
        start = end - overlap;
    }
    windows
}

/// Clips `text` to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_window_when_text_fits() {
        assert_eq!(chunk("hello", 5, 2), vec!["hello"]);
        assert_eq!(chunk("hello", 6, 2), vec!["hello"]);
    }

    #[test]
    fn empty_text_yields_one_empty_window() {
        assert_eq!(chunk("", 10, 2), vec![""]);
    }

    #[test]
    fn windows_overlap_by_requested_amount() {
        let windows = chunk("0123456789", 4, 2);
        assert_eq!(windows, vec!["0123", "2345", "4567", "6789"]);
    }

    #[test]
    fn final_window_is_clipped() {
        let windows = chunk("012345678", 4, 1);
        assert_eq!(windows, vec!["0123", "3456", "678"]);
        assert!(windows.iter().all(|w| w.chars().count() <= 4));
    }

    #[test]
    fn no_empty_windows_for_non_empty_input() {
        for size in 1..8 {
            for overlap in 0..size {
                let windows = chunk("abcdefghijk", size, overlap);
                assert!(windows.iter().all(|w| !w.is_empty()));
            }
        }
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "привет мир, это длинный текст";
        let windows = chunk(text, 10, 3);
        assert!(windows.len() > 1);
        assert!(windows.iter().all(|w| w.chars().count() <= 10));
    }

    #[test]
    fn degenerate_overlap_still_terminates() {
        let windows = chunk("abcdefgh", 3, 3);
        assert!(windows.len() > 1);
        assert!(windows.iter().all(|w| w.chars().count() <= 3));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("привет", 3), "при");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
