use crate::models::ChunkFragment;

pub const DEFAULT_WINDOW_WORDS: usize = 200;

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` into non-overlapping windows of `window` whitespace-separated
/// words. The last window may be shorter; each fragment keeps the word offset
/// it starts at within the unit.
pub fn chunk_words(
    text: &str,
    unit_id: u32,
    window: usize,
) -> impl Iterator<Item = ChunkFragment> + '_ {
    let window = window.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();

    (0..words.len()).step_by(window).map(move |offset| {
        let end = (offset + window).min(words.len());
        ChunkFragment {
            unit_id,
            offset,
            text: words[offset..end].join(" "),
        }
    })
}
