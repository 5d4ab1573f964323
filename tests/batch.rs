//! Integration tests for the full pipeline with in-memory fixtures and a
//! scripted AI client. No network access, no sample files.
//!
//! Run with:
//!   cargo test --test batch

mod common;

use common::{CountingReader, ScriptedClient};
use edgequake_doc2json::pipeline::budget;
use edgequake_doc2json::{
    convert_stream, AiError, BatchOrchestrator, ConversionConfig, ConversionResult, Doc2JsonError,
    Document, ErrorKind, FormatReader, OfficeReader,
};
use futures::StreamExt;
use std::sync::Arc;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config() -> ConversionConfig {
    ConversionConfig::builder()
        .retry_backoff_ms(1)
        .build()
        .expect("valid config")
}

/// A small window so truncation kicks in with modest inputs.
fn small_window() -> ConversionConfig {
    ConversionConfig::builder()
        .system_prompt("Structure the content.")
        .context_window_tokens(8_000)
        .safety_margin_ratio(0.0)
        .output_tokens_range(100, 400)
        .document_size_tiers(2_000, 4_000)
        .retry_backoff_ms(1)
        .build()
        .expect("valid config")
}

fn orchestrator(config: ConversionConfig, client: Arc<ScriptedClient>) -> BatchOrchestrator {
    BatchOrchestrator::new(config, client)
}

const LESSON: &str = "Cell biology studies the structure and function of cells";

fn lesson_pdf(name: &str) -> Document {
    Document::new(name, common::pdf(&[LESSON, "Mitochondria produce energy for the cell"]))
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[test]
fn every_supported_format_yields_text() {
    let cases = vec![
        Document::new("a.pdf", common::pdf(&[LESSON])),
        Document::new("a.docx", common::docx(&[LESSON, "Second paragraph"])),
        Document::new("a.pptx", common::pptx(&[&[LESSON], &["Summary"]])),
        Document::new("a.doc", common::doc(&format!("{LESSON}\rSecond paragraph\r"))),
        Document::new("a.ppt", common::ppt(&[LESSON, "Summary"])),
    ];
    for document in cases {
        let name = document.filename.clone();
        let extracted = OfficeReader
            .extract(document)
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        assert!(!extracted.text.trim().is_empty(), "{name}: empty text");
        assert!(extracted.text.contains("Cell biology"), "{name}: {:?}", extracted.text);
        assert_eq!(extracted.char_count, extracted.text.chars().count());
    }
}

#[test]
fn slide_formats_mark_slide_boundaries() {
    for document in [
        Document::new("deck.pptx", common::pptx(&[&["Intro"], &["Summary"]])),
        Document::new("deck.ppt", common::ppt(&["Intro", "Summary"])),
    ] {
        let text = OfficeReader.extract(document).unwrap().text;
        let first = text.find("--- Slide 1 ---").expect("slide 1 marker");
        let second = text.find("--- Slide 2 ---").expect("slide 2 marker");
        assert!(first < text.find("Intro").unwrap());
        assert!(text.find("Intro").unwrap() < second);
        assert!(second < text.find("Summary").unwrap());
    }
}

#[tokio::test]
async fn unsupported_format_fails_without_model_call() {
    let client = ScriptedClient::always(Ok(common::reply("Biology", 1)));
    let result = orchestrator(config(), client.clone())
        .convert_document(Document::new("notes.txt", LESSON.as_bytes().to_vec()))
        .await
        .unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::UnsupportedFormat));
    assert!(result.error().unwrap().message.contains("txt"));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn mislabelled_file_is_corrupt() {
    let client = ScriptedClient::always(Ok(common::reply("Biology", 1)));
    let result = orchestrator(config(), client.clone())
        .convert_document(Document::new("slides.pptx", common::pdf(&[LESSON])))
        .await
        .unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::CorruptFile));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn image_only_pdf_is_insufficient_text() {
    let client = ScriptedClient::always(Ok(common::reply("Biology", 1)));
    let result = orchestrator(config(), client.clone())
        .convert_document(Document::new("scan.pdf", common::pdf(&[""])))
        .await
        .unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::InsufficientText));
    assert_eq!(client.calls(), 0);
}

// ── Budget ───────────────────────────────────────────────────────────────────

#[test]
fn plans_are_deterministic_and_monotonic() {
    let config = small_window();
    let text: String = (0..6_000).map(|i| format!("word{i} ")).collect();
    let sizes = [0usize, 100, 1_999, 2_001, 4_001, 10_000, 30_000, text.len()];

    let mut last_input = 0;
    let mut last_output = 0;
    for n in sizes {
        let slice = &text[..n];
        let a = budget::plan(slice, &config);
        assert_eq!(a, budget::plan(slice, &config), "plan for {n} chars changed");
        assert!(a.estimated_input_tokens >= last_input, "input shrank at {n}");
        assert!(a.max_output_tokens >= last_output, "output shrank at {n}");
        assert!(
            a.estimated_input_tokens + a.max_output_tokens <= config.context_window_tokens,
            "window exceeded at {n}"
        );
        last_input = a.estimated_input_tokens;
        last_output = a.max_output_tokens;
    }
}

#[tokio::test]
async fn truncated_document_carries_the_note_through() {
    let config = small_window();
    let paragraphs: Vec<String> = (0..1_000)
        .map(|i| format!("Paragraph {i} explains one more idea about cells."))
        .collect();
    let refs: Vec<&str> = paragraphs.iter().map(String::as_str).collect();
    let client = ScriptedClient::always(Ok(common::reply("Biology", 2)));

    let result = orchestrator(config, client.clone())
        .convert_document(Document::new("long.docx", common::docx(&refs)))
        .await
        .unwrap();

    let ConversionResult::Success {
        data, token_plan, ..
    } = &result
    else {
        panic!("expected success, got {result:?}");
    };
    assert!(token_plan.was_truncated);
    assert!(token_plan.retained_chars < token_plan.original_chars);
    let note = token_plan.truncation_note.as_deref().unwrap();
    assert_eq!(data.subject.truncation_note.as_deref(), Some(note));

    let request = &client.requests()[0];
    assert!(request.user_prompt.contains(note));
    assert!(request.system_prompt.contains(note));
    assert!(request.user_prompt.contains("Paragraph 0 explains"));
    assert!(!request.user_prompt.contains("Paragraph 999 explains"));
}

// ── Assembly ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn well_formed_reply_round_trips() {
    let reply = common::reply("Biology", 3);
    let client = ScriptedClient::always(Ok(reply.clone()));
    let result = orchestrator(config(), client)
        .convert_document(lesson_pdf("cells.pdf"))
        .await
        .unwrap();

    let data = result.data().expect("success");
    let expected: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(serde_json::to_value(data).unwrap(), expected);
}

#[tokio::test]
async fn fenced_reply_with_gapped_ids_is_normalised() {
    let raw = r#"```json
{"Biology": {"title": "Biology", "description": "Cells", "chapters": [
  {"title": "Cells", "topics": [
    {"topic_id": "topic_1", "title": "A", "content": "a"},
    {"topic_id": "topic_5", "title": "B", "content": "b", "keywords": "membrane"}
  ]},
  {"title": "Energy", "topics": [
    {"topic_id": "topic_3", "title": "C", "content": "c"}
  ]}
]}}
```"#;
    let client = ScriptedClient::always(Ok(raw.to_string()));
    let result = orchestrator(config(), client)
        .convert_document(lesson_pdf("cells.pdf"))
        .await
        .unwrap();

    let data = result.data().expect("success");
    let ids: Vec<(usize, &str)> = data
        .topics()
        .map(|(ch, t)| (ch, t.topic_id.as_str()))
        .collect();
    assert_eq!(ids, [(0, "topic_1"), (0, "topic_2"), (1, "topic_1")]);
    assert_eq!(data.subject.chapters[0].topics[1].keywords, ["membrane"]);
    assert!(data.subject.chapters[0].topics[0].examples.is_empty());
    let ConversionResult::Success { warnings, .. } = &result else {
        unreachable!()
    };
    assert!(!warnings.is_empty());
}

#[tokio::test]
async fn malformed_reply_is_reported_with_raw_output() {
    let client = ScriptedClient::always(Ok("Sorry, I cannot help with that.".into()));
    let result = orchestrator(config(), client.clone())
        .convert_document(lesson_pdf("cells.pdf"))
        .await
        .unwrap();
    let error = result.error().expect("failure");
    assert_eq!(error.kind, ErrorKind::MalformedOutput);
    assert_eq!(error.raw_output.as_deref(), Some("Sorry, I cannot help with that."));
    assert_eq!(client.calls(), 1);
}

// ── Batch semantics ──────────────────────────────────────────────────────────

#[tokio::test]
async fn one_bad_file_does_not_sink_the_batch() {
    let client = ScriptedClient::always(Ok(common::reply("Biology", 1)));
    let documents = vec![
        lesson_pdf("one.pdf"),
        Document::new("two.docx", b"PK\x03\x04 definitely not a zip".to_vec()),
        Document::new("three.pptx", common::pptx(&[&[LESSON]])),
    ];

    let batch = orchestrator(config(), client.clone())
        .run(documents)
        .await
        .unwrap();

    assert_eq!(batch.summary.total_files, 3);
    assert_eq!(batch.summary.succeeded, 2);
    assert_eq!(batch.summary.failed, 1);
    let names: Vec<&str> = batch.results.iter().map(|o| o.filename.as_str()).collect();
    assert_eq!(names, ["one.pdf", "two.docx", "three.pptx"]);
    assert_eq!(
        batch.results[1].result.error_kind(),
        Some(ErrorKind::CorruptFile)
    );
    assert_eq!(client.calls(), 2);

    let json = serde_json::to_value(&batch).unwrap();
    assert_eq!(json["summary"]["successful"], 2);
    assert_eq!(json["results"][1]["status"], "error");
}

#[tokio::test]
async fn oversized_batch_is_rejected_before_any_work() {
    let config = ConversionConfig::builder()
        .max_combined_upload_bytes(64)
        .build()
        .unwrap();
    let reader = Arc::new(CountingReader::default());
    let client = ScriptedClient::always(Ok(common::reply("Biology", 1)));
    let orch = BatchOrchestrator::new(config, client.clone()).with_reader(reader.clone());

    let err = orch
        .run(vec![lesson_pdf("a.pdf"), lesson_pdf("b.pdf")])
        .await
        .unwrap_err();
    assert!(matches!(err, Doc2JsonError::BatchTooLarge { .. }), "{err}");
    assert_eq!(reader.calls(), 0);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn too_many_files_is_rejected_before_any_work() {
    let config = ConversionConfig::builder()
        .max_files_per_batch(1)
        .build()
        .unwrap();
    let reader = Arc::new(CountingReader::default());
    let client = ScriptedClient::always(Ok(common::reply("Biology", 1)));
    let orch = BatchOrchestrator::new(config, client.clone()).with_reader(reader.clone());

    let err = orch
        .run(vec![lesson_pdf("a.pdf"), lesson_pdf("b.pdf")])
        .await
        .unwrap_err();
    assert!(matches!(err, Doc2JsonError::TooManyFiles { count: 2, max: 1 }));
    assert_eq!(reader.calls(), 0);
}

#[tokio::test]
async fn transient_failures_stop_at_max_attempts() {
    let config = ConversionConfig::builder()
        .max_attempts(4)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let client = ScriptedClient::always(Err(AiError::Transient {
        detail: "503 Service Unavailable".into(),
    }));

    let result = orchestrator(config, client.clone())
        .convert_document(lesson_pdf("cells.pdf"))
        .await
        .unwrap();

    assert_eq!(client.calls(), 4);
    let error = result.error().expect("failure");
    assert_eq!(error.kind, ErrorKind::TransientError);
    assert!(error.message.contains("4 attempts"), "{}", error.message);
}

#[tokio::test]
async fn rate_limit_then_success_counts_attempts() {
    let client = ScriptedClient::new(vec![
        Err(AiError::RateLimited {
            retry_after: None,
            detail: "429".into(),
        }),
        Ok(common::reply("Biology", 1)),
    ]);
    let result = orchestrator(config(), client.clone())
        .convert_document(lesson_pdf("cells.pdf"))
        .await
        .unwrap();
    assert!(matches!(
        result,
        ConversionResult::Success { attempts: 2, .. }
    ));
}

// ── Streaming ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_matches_batch_order() {
    let client = ScriptedClient::always(Ok(common::reply("Biology", 1)));
    let config = ConversionConfig::builder()
        .ai_client(client.clone())
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let documents = vec![
        lesson_pdf("one.pdf"),
        Document::new("two.doc", common::doc(&format!("{LESSON}\r"))),
        Document::new("three.txt", b"plain".to_vec()),
    ];

    let outcomes: Vec<_> = convert_stream(documents, &config)
        .await
        .unwrap()
        .collect()
        .await;
    let summary: Vec<(&str, bool)> = outcomes
        .iter()
        .map(|o| (o.filename.as_str(), o.result.is_success()))
        .collect();
    assert_eq!(
        summary,
        [("one.pdf", true), ("two.doc", true), ("three.txt", false)]
    );
    assert_eq!(client.calls(), 2);
}
