//! Fragmentation: splitting cleaned content into citable spans.

use super::content::Section;
use crate::types::{FragmentDraft, FRAGMENT_MAX_CHARS};

/// Split sections into fragments of at most [`FRAGMENT_MAX_CHARS`]
/// characters, breaking on sentence boundaries where possible and keeping
/// each fragment's heading context.
pub fn fragment_sections(sections: &[Section]) -> Vec<FragmentDraft> {
    let mut drafts = Vec::new();
    let mut position = 0i64;
    for section in sections {
        for chunk in split_text(&section.text, FRAGMENT_MAX_CHARS) {
            drafts.push(FragmentDraft {
                heading_context: section.heading.clone(),
                text: chunk,
                position,
            });
            position += 1;
        }
    }
    drafts
}

/// Greedy sentence packing: sentences are accumulated until the next one
/// would cross `max` characters. Oversized sentences are hard-cut.
fn split_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for sentence in sentences(text) {
        let sentence_chars = sentence.chars().count();
        if current_chars + sentence_chars > max && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current = String::new();
            current_chars = 0;
        }
        if sentence_chars > max {
            // A single runaway sentence: cut at the character bound.
            for piece in hard_cut(sentence, max) {
                chunks.push(piece);
            }
            continue;
        }
        current.push_str(sentence);
        current_chars += sentence_chars;
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

/// Sentence-ish segmentation on terminal punctuation followed by space.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let next = bytes.get(i + 1);
            if next.is_none() || next == Some(&b' ') || next == Some(&b'\n') {
                out.push(&text[start..=i.min(text.len() - 1)]);
                start = i + 1;
            }
        }
        i += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn hard_cut(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
