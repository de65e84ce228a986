//! Paragraph-boundary text chunker.
//!
//! Splits text on line boundaries and greedily word-wraps each non-empty
//! paragraph to at most `max_chars` characters, preserving original order.
//! Words are never broken: a single word longer than the limit is emitted
//! as its own oversized chunk rather than split mid-word.

/// Split `text` into embedding-ready chunks.
///
/// Empty or whitespace-only input yields an empty sequence, not an error.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();

    for para in text.lines() {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        wrap_paragraph(trimmed, max_chars, &mut chunks);
    }

    chunks
}

fn wrap_paragraph(para: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in para.split_whitespace() {
        let word_len = word.chars().count();

        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            out.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_abstract_single_chunk() {
        let chunks = split_text("Short abstract.", 1000);
        assert_eq!(chunks, vec!["Short abstract.".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", 1000).is_empty());
        assert!(split_text("  \n\n  ", 1000).is_empty());
    }

    #[test]
    fn chunks_respect_max_chars() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = split_text(text, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.chars().count() <= 20,
                "chunk exceeds limit: {:?}",
                chunk
            );
        }
    }

    #[test]
    fn words_are_never_broken() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = split_text(text, 12);
        let rejoined: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.split_whitespace())
            .collect();
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn oversized_word_emitted_whole() {
        let text = "supercalifragilisticexpialidocious yes";
        let chunks = split_text(text, 10);
        assert_eq!(chunks[0], "supercalifragilisticexpialidocious");
        assert_eq!(chunks[1], "yes");
    }

    #[test]
    fn paragraphs_preserve_order() {
        let text = "First paragraph here.\nSecond paragraph here.\n\nThird one.";
        let chunks = split_text(text, 1000);
        assert_eq!(
            chunks,
            vec![
                "First paragraph here.".to_string(),
                "Second paragraph here.".to_string(),
                "Third one.".to_string(),
            ]
        );
    }

    #[test]
    fn deterministic() {
        let text = "Alpha beta gamma.\nDelta epsilon zeta eta theta.";
        assert_eq!(split_text(text, 15), split_text(text, 15));
    }
}
