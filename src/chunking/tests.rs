use super::*;

fn config() -> ChunkingConfig {
    ChunkingConfig::default()
}

fn word_text(words: usize) -> String {
    (0..words)
        .map(|i| format!("word{i:04}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn char_count(text: &str) -> usize {
    text.chars().count()
}

#[test]
fn short_text_is_one_chunk() {
    let chunks = split_text("A short paragraph that fits easily.", &config());

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0], "A short paragraph that fits easily.");
}

#[test]
fn empty_text_yields_no_chunks() {
    assert!(split_text("", &config()).is_empty());
    assert!(split_text("   \n\n  ", &config()).is_empty());
}

#[test]
fn chunks_respect_size_limit() {
    let text = word_text(2000);
    let chunks = split_text(&text, &config());

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(
            char_count(chunk) <= 1200,
            "chunk of {} chars exceeds limit",
            char_count(chunk)
        );
    }
}

#[test]
fn adjacent_chunks_overlap() {
    let text = word_text(2000);
    let chunks = split_text(&text, &config());

    assert!(chunks.len() > 1);
    for pair in chunks.windows(2) {
        // The next chunk must start with a tail of the previous one, close to
        // the configured 300-character overlap for uniform word input.
        let overlap = longest_shared_edge(&pair[0], &pair[1]);
        assert!(
            overlap >= 250,
            "expected ~300 chars of overlap, found {}",
            overlap
        );
    }
}

#[test]
fn prefers_paragraph_boundaries() {
    let paragraph = word_text(60);
    let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}\n\n{paragraph}");
    let chunks = split_text(&text, &config());

    assert!(chunks.len() > 1);
    // No paragraph gets torn: every chunk boundary coincides with a
    // paragraph break, so each chunk contains only whole paragraphs.
    for chunk in &chunks {
        for part in chunk.split("\n\n") {
            assert!(paragraph.starts_with(part.trim_end()) || part == paragraph);
        }
    }
}

#[test]
fn hard_cuts_unbroken_text() {
    let text = "x".repeat(5000);
    let chunks = split_text(&text, &config());

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(char_count(chunk) <= 1200);
    }
    // Hard cut windows advance by chunk_size - overlap.
    assert_eq!(char_count(&chunks[0]), 1200);
}

#[test]
fn chunk_document_assigns_ordered_indices() {
    let document = LoadedDocument {
        text: word_text(1000),
        source: "report.txt".to_string(),
    };

    let chunks = chunk_document(&document, &config());

    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as u32);
        assert_eq!(chunk.source, "report.txt");
    }
}

/// Length of the longest suffix of `left` that is also a prefix of `right`.
fn longest_shared_edge(left: &str, right: &str) -> usize {
    let left_chars: Vec<char> = left.chars().collect();
    let right_chars: Vec<char> = right.chars().collect();
    let max = left_chars.len().min(right_chars.len());

    for len in (1..=max).rev() {
        if left_chars[left_chars.len() - len..] == right_chars[..len] {
            return len;
        }
    }
    0
}
