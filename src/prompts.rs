//! Prompts for structuring extracted document text into subject JSON.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the structural contract (a new
//!    topic field, a stricter rule) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests and the token budgeter can inspect the
//!    prompts directly without a live model, so the overhead they add to
//!    every request is accounted for exactly.
//!
//! Callers can override the guidance via
//! [`crate::config::ConversionConfig::system_prompt`]; the JSON contract in
//! [`SCHEMA_DESCRIPTION`] is always appended regardless.

/// Default system prompt: role and content guidelines.
pub const SYSTEM_PROMPT: &str = r#"You are an expert at analysing educational material and organising it into a clear, teachable structure.
Read the provided content and convert it into the JSON structure described below.

Guidelines:
1. Identify the main subject of the content and use its name (e.g. "Mathematics", "Physics", "Indian Polity") as the single top-level key.
2. Break the content into logical chapters, in the order they appear.
3. Within each chapter, identify distinct topics, in the order they appear.
4. For each topic provide:
   - topic_id: "topic_1", "topic_2", ... numbered from 1 within each chapter
   - a clear, descriptive title
   - content: a thorough explanation drawn from the material
   - examples: concrete examples from the content; when the content has none, give 2-3 illustrative educational examples
   - real_world_applications: 2-3 practical uses of the concept in society, industry or professional practice
   - keywords: 5-10 key terms central to understanding the topic
5. Every array field must be present, even when empty. Prefer meaningful entries over empty arrays.
6. Keep the structure logical and educational.
7. Return ONLY valid JSON matching the structure exactly: no markdown fences, no commentary, no extra fields."#;

/// The structural contract the model must satisfy.
pub const SCHEMA_DESCRIPTION: &str = r#"REQUIRED JSON STRUCTURE (do not add or remove fields):

{
  "<subject name>": {
    "title": "",
    "description": "",
    "chapters": [
      {
        "title": "",
        "topics": [
          {
            "topic_id": "topic_1",
            "title": "",
            "content": "",
            "examples": [],
            "real_world_applications": [],
            "keywords": []
          }
        ]
      }
    ]
  }
}

- Root: exactly one key, the subject name, whose value is an object.
  - "title" (string): subject title
  - "description" (string): short description of the subject
  - "chapters" (array of objects):
    - "title" (string)
    - "topics" (array of objects):
      - "topic_id" (string): "topic_N", unique and sequential within the chapter, starting at 1
      - "title" (string)
      - "content" (string)
      - "examples" (array of strings, may be [])
      - "real_world_applications" (array of strings, may be [])
      - "keywords" (array of strings, may be [])"#;

/// User message wrapper. `{filename}` and `{text_content}` are substituted.
pub const USER_PROMPT_TEMPLATE: &str = "Analyse the following content and convert it to the required JSON structure.\n\nFilename: {filename}\n\nContent:\n{text_content}\n\nReturn only the JSON structure as specified.";

/// Appended to the system prompt when the document was cut to fit the window.
/// `{note}` is substituted with the truncation note.
pub const TRUNCATION_INSTRUCTION: &str = "\n\nThe content was shortened to fit the model's context window. Add a \"truncation_note\" string field to the subject object (next to \"title\") containing exactly this text, verbatim:\n{note}";

/// Characters reserved for the filename, which is unknown when budgeting.
pub const FILENAME_RESERVE_CHARS: usize = 256;

/// Characters reserved for the truncation note. It is sent twice: after the
/// retained text and inside [`TRUNCATION_INSTRUCTION`].
pub const TRUNCATION_NOTE_RESERVE_CHARS: usize = 512;

/// Join the caller's guidance with the fixed schema contract.
pub fn system_message(guidance: &str) -> String {
    format!("{guidance}\n\n{SCHEMA_DESCRIPTION}")
}

/// Build the user message for one document.
///
/// Filenames longer than [`FILENAME_RESERVE_CHARS`] are cut short with `…`.
pub fn user_message(filename: &str, text: &str) -> String {
    USER_PROMPT_TEMPLATE
        .replace("{filename}", &prompt_filename(filename))
        .replace("{text_content}", text)
}

fn prompt_filename(filename: &str) -> std::borrow::Cow<'_, str> {
    match filename.char_indices().nth(FILENAME_RESERVE_CHARS) {
        None => filename.into(),
        Some(_) => {
            let kept: String = filename.chars().take(FILENAME_RESERVE_CHARS - 1).collect();
            format!("{kept}…").into()
        }
    }
}

pub fn truncation_instruction(note: &str) -> String {
    TRUNCATION_INSTRUCTION.replace("{note}", note)
}

/// Characters every request spends before any document text: system message,
/// user wrapper, truncation instruction and the filename / note reserves.
pub fn fixed_overhead_chars(guidance: &str) -> usize {
    system_message(guidance).chars().count()
        + user_message("", "").chars().count()
        + truncation_instruction("").chars().count()
        + FILENAME_RESERVE_CHARS
        + TRUNCATION_NOTE_RESERVE_CHARS
}
