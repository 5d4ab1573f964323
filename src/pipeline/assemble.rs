//! Result assembly: turn raw model text into a validated [`SubjectDocument`].
//!
//! The model is asked for bare JSON in a fixed shape; what comes back is
//! usually that, sometimes wrapped in fences or prose, and occasionally
//! bent in small ways (a missing `keywords` array, a single string where a
//! list was asked for, topic ids that restart or skip). Assembly:
//!
//! 1. isolates the JSON object ([`postprocess::extract_json_payload`]),
//! 2. walks it as a [`serde_json::Value`], requiring every structural field,
//! 3. repairs only lossless deviations, recording a warning for each, and
//! 4. rejects everything else as `malformed_output`, keeping the raw text.
//!
//! Missing *content* is never invented: a topic without `content` is an
//! error, not an empty string.

use crate::error::AssembleError;
use crate::output::{Chapter, Subject, SubjectDocument, Topic};
use crate::pipeline::budget::TokenPlan;
use crate::pipeline::postprocess;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

/// A validated document plus the repairs made to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub document: SubjectDocument,
    pub warnings: Vec<String>,
}

/// Parse and validate `raw` against the subject schema.
///
/// `plan` supplies the truncation note the result must carry when the input
/// was cut short.
pub fn assemble(raw: &str, plan: &TokenPlan) -> Result<Assembled, AssembleError> {
    let mut ctx = Assembler {
        raw,
        warnings: Vec::new(),
    };
    let document = ctx.document(plan)?;
    for w in &ctx.warnings {
        warn!("Repaired model output: {}", w);
    }
    Ok(Assembled {
        document,
        warnings: ctx.warnings,
    })
}

struct Assembler<'a> {
    raw: &'a str,
    warnings: Vec<String>,
}

impl Assembler<'_> {
    fn fail(&self, reason: impl Into<String>) -> AssembleError {
        AssembleError {
            reason: reason.into(),
            raw_output: self.raw.to_string(),
        }
    }

    fn document(&mut self, plan: &TokenPlan) -> Result<SubjectDocument, AssembleError> {
        let payload = postprocess::extract_json_payload(self.raw);
        let root: Value = serde_json::from_str(payload)
            .map_err(|e| self.fail(format!("not valid JSON ({e})")))?;
        let root = match root {
            Value::Object(map) => map,
            other => return Err(self.fail(format!("expected a JSON object, got {}", type_name(&other)))),
        };
        if root.len() != 1 {
            return Err(self.fail(format!(
                "expected exactly one subject key at the root, found {}",
                root.len()
            )));
        }
        let Some((subject_name, subject)) = root.into_iter().next() else {
            return Err(self.fail("empty root object"));
        };
        if subject_name.trim().is_empty() {
            return Err(self.fail("subject name is empty"));
        }
        let Value::Object(subject) = subject else {
            return Err(self.fail(format!("subject '{subject_name}' is not an object")));
        };

        let mut subject = self.subject(&subject_name, subject)?;
        self.reconcile_note(&mut subject, plan);
        Ok(SubjectDocument {
            subject_name,
            subject,
        })
    }

    fn subject(&mut self, name: &str, mut obj: Map<String, Value>) -> Result<Subject, AssembleError> {
        let title = self.required_string(&mut obj, "title", name)?;
        let description = self.required_string(&mut obj, "description", name)?;
        let truncation_note = match obj.remove("truncation_note") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                return Err(self.fail(format!(
                    "{name}.truncation_note: expected a string, got {}",
                    type_name(&other)
                )))
            }
        };
        let chapters = self
            .required_array(&mut obj, "chapters", name)?
            .into_iter()
            .enumerate()
            .map(|(i, ch)| self.chapter(&format!("{name}.chapters[{i}]"), ch))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Subject {
            title,
            description,
            truncation_note,
            chapters,
        })
    }

    fn chapter(&mut self, path: &str, value: Value) -> Result<Chapter, AssembleError> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(self.fail(format!("{path}: expected an object, got {}", type_name(&other))))
            }
        };
        let title = self.required_string(&mut obj, "title", path)?;
        let mut topics = self
            .required_array(&mut obj, "topics", path)?
            .into_iter()
            .enumerate()
            .map(|(i, t)| self.topic(&format!("{path}.topics[{i}]"), t))
            .collect::<Result<Vec<_>, _>>()?;
        self.normalise_topic_ids(path, &mut topics)?;
        Ok(Chapter { title, topics })
    }

    fn topic(&mut self, path: &str, value: Value) -> Result<Topic, AssembleError> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(self.fail(format!("{path}: expected an object, got {}", type_name(&other))))
            }
        };
        let topic_id = match obj.remove("topic_id") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => {
                self.warnings
                    .push(format!("{path}.topic_id: number {n} converted to a string"));
                n.to_string()
            }
            Some(other) => {
                return Err(self.fail(format!(
                    "{path}.topic_id: expected a string, got {}",
                    type_name(&other)
                )))
            }
            None => return Err(self.fail(format!("{path}: missing required field \"topic_id\""))),
        };
        if topic_id.is_empty() {
            return Err(self.fail(format!("{path}.topic_id is empty")));
        }

        Ok(Topic {
            topic_id,
            title: self.required_string(&mut obj, "title", path)?,
            content: self.required_string(&mut obj, "content", path)?,
            examples: self.string_list(&mut obj, "examples", path)?,
            real_world_applications: self.string_list(&mut obj, "real_world_applications", path)?,
            keywords: self.string_list(&mut obj, "keywords", path)?,
        })
    }

    /// Ids must be distinct; distinct ids out of `topic_1..topic_k` order are renumbered.
    fn normalise_topic_ids(&mut self, path: &str, topics: &mut [Topic]) -> Result<(), AssembleError> {
        let mut seen = HashSet::with_capacity(topics.len());
        for t in topics.iter() {
            if !seen.insert(t.topic_id.as_str()) {
                return Err(self.fail(format!("{path}: duplicate topic_id \"{}\"", t.topic_id)));
            }
        }
        let sequential = topics
            .iter()
            .enumerate()
            .all(|(i, t)| t.topic_id == format!("topic_{}", i + 1));
        if !sequential {
            let old: Vec<&str> = topics.iter().map(|t| t.topic_id.as_str()).collect();
            let msg = format!("{path}: topic ids {old:?} renumbered to topic_1..topic_{}", topics.len());
            for (i, t) in topics.iter_mut().enumerate() {
                t.topic_id = format!("topic_{}", i + 1);
            }
            self.warnings.push(msg);
        }
        Ok(())
    }

    fn reconcile_note(&mut self, subject: &mut Subject, plan: &TokenPlan) {
        let expected = plan.truncation_note.as_deref().filter(|_| plan.was_truncated);
        match (expected, subject.truncation_note.as_deref()) {
            (Some(want), Some(got)) if want == got => {}
            (Some(want), got) => {
                self.warnings.push(if got.is_some() {
                    "truncation_note did not match the plan and was replaced".into()
                } else {
                    "truncation_note was missing and has been attached".into()
                });
                subject.truncation_note = Some(want.to_string());
            }
            (None, Some(_)) => {
                self.warnings
                    .push("truncation_note dropped: the input was not truncated".into());
                subject.truncation_note = None;
            }
            (None, None) => {}
        }
    }

    fn required_string(
        &self,
        obj: &mut Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Result<String, AssembleError> {
        match obj.remove(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(self.fail(format!(
                "{path}.{key}: expected a string, got {}",
                type_name(&other)
            ))),
            None => Err(self.fail(format!("{path}: missing required field \"{key}\""))),
        }
    }

    fn required_array(
        &self,
        obj: &mut Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Result<Vec<Value>, AssembleError> {
        match obj.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(self.fail(format!(
                "{path}.{key}: expected an array, got {}",
                type_name(&other)
            ))),
            None => Err(self.fail(format!("{path}: missing required field \"{key}\""))),
        }
    }

    /// Missing or null → `[]`; a lone scalar → one-element list; scalars
    /// inside the list → strings. Objects and nested arrays are malformed.
    fn string_list(
        &mut self,
        obj: &mut Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Result<Vec<String>, AssembleError> {
        let items = match obj.remove(key) {
            None | Some(Value::Null) => {
                self.warnings.push(format!("{path}.{key}: missing, defaulted to []"));
                return Ok(Vec::new());
            }
            Some(Value::Array(items)) => items,
            Some(scalar @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                self.warnings
                    .push(format!("{path}.{key}: single value wrapped in a list"));
                vec![scalar]
            }
            Some(other) => {
                return Err(self.fail(format!(
                    "{path}.{key}: expected an array of strings, got {}",
                    type_name(&other)
                )))
            }
        };

        items
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::String(s) => Some(Ok(s)),
                Value::Null => None,
                Value::Number(n) => Some(Ok(n.to_string())),
                Value::Bool(b) => Some(Ok(b.to_string())),
                other => Some(Err(self.fail(format!(
                    "{path}.{key}[{i}]: expected a string, got {}",
                    type_name(&other)
                )))),
            })
            .collect()
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
