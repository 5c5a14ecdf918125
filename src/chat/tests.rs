use super::*;

fn chunk(content: &str) -> RetrievedChunk {
    RetrievedChunk {
        content: content.to_string(),
        source: "doc.txt".to_string(),
        chunk_index: 0,
        distance: 0.1,
    }
}

#[test]
fn buffer_flushes_on_char_threshold() {
    let start = Instant::now();
    let mut buffer = StreamBuffer::new(100, Duration::from_secs(3600));

    let fragment = "a".repeat(30);
    assert!(buffer.push(&fragment, start).is_none());
    assert!(buffer.push(&fragment, start).is_none());
    assert!(buffer.push(&fragment, start).is_none());

    // Fourth fragment crosses 100 chars and flushes the whole batch.
    let batch = buffer.push(&fragment, start).expect("should flush");
    assert_eq!(batch.chars().count(), 120);

    assert!(buffer.finish().is_none());
}

#[test]
fn buffer_flushes_on_elapsed_time() {
    let start = Instant::now();
    let mut buffer = StreamBuffer::new(100, Duration::from_millis(100));

    assert!(buffer.push("hi", start).is_none());

    let batch = buffer
        .push(" there", start + Duration::from_millis(150))
        .expect("should flush on delay");
    assert_eq!(batch, "hi there");
}

#[test]
fn buffer_delay_resets_after_flush() {
    let start = Instant::now();
    let mut buffer = StreamBuffer::new(100, Duration::from_millis(100));

    buffer
        .push("first", start + Duration::from_millis(150))
        .expect("should flush");

    // The clock restarts at the flush; 50ms later nothing fires.
    assert!(
        buffer
            .push("x", start + Duration::from_millis(200))
            .is_none()
    );
}

#[test]
fn buffer_finish_drains_remainder() {
    let start = Instant::now();
    let mut buffer = StreamBuffer::new(100, Duration::from_secs(3600));

    buffer.push("tail", start);

    assert_eq!(buffer.finish().as_deref(), Some("tail"));
    assert!(buffer.finish().is_none());
}

#[test]
fn buffer_counts_chars_not_bytes() {
    let start = Instant::now();
    let mut buffer = StreamBuffer::new(4, Duration::from_secs(3600));

    // Three multi-byte chars stay under the four-char threshold.
    assert!(buffer.push("äöü", start).is_none());
    assert!(buffer.push("ß", start).is_some());
}

#[test]
fn system_prompt_includes_persona_and_tone() {
    let prompt = system_prompt("DR.TRUTH", "Humorous, satire and sarcasm but end with honesty");

    assert_eq!(
        prompt,
        "You are DR.TRUTH. Respond with Humorous, satire and sarcasm but end with honesty tone."
    );
}

#[test]
fn user_prompt_grounds_question_in_context() {
    let chunks = vec![chunk("Rust is a systems language."), chunk("It has no GC.")];

    let prompt = build_prompt("DR.TRUTH", "dry", &chunks, "What is Rust?");

    assert!(prompt.starts_with("You are DR.TRUTH. Tone: dry\n"));
    assert!(prompt.contains("Context: Rust is a systems language.\n\nIt has no GC."));
    assert!(prompt.ends_with("Question: What is Rust?"));
}

#[test]
fn user_prompt_with_no_chunks_has_empty_context() {
    let prompt = build_prompt("DR.TRUTH", "dry", &[], "Anything?");

    assert!(prompt.contains("Context: \n"));
}

#[test]
fn parse_chat_line_extracts_content() {
    let fragment = parse_chat_line(r#"{"message":{"role":"assistant","content":"Hello"},"done":false}"#)
        .expect("should parse");

    assert_eq!(fragment.as_deref(), Some("Hello"));
}

#[test]
fn parse_chat_line_skips_done_and_empty() {
    assert!(
        parse_chat_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#)
            .expect("should parse")
            .is_none()
    );
    assert!(parse_chat_line("").expect("should parse").is_none());
    assert!(parse_chat_line("   \n").expect("should parse").is_none());
}

#[test]
fn parse_chat_line_rejects_garbage() {
    let result = parse_chat_line("not json");

    assert!(matches!(result, Err(DocChatError::Generation(_))));
}
