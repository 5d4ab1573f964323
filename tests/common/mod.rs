//! Fixture builders and test doubles shared by the integration tests.
//!
//! Every format is built in memory so the suite needs no sample files.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_doc2json::{
    AiClient, AiError, ConversionRequest, Document, ExtractError, ExtractedText, FormatReader,
    OfficeReader,
};
use lopdf::{dictionary, Object, Stream};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ── PDF ──────────────────────────────────────────────────────────────────────

/// A PDF with one Helvetica text line per page.
pub fn pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut page_ids = Vec::new();
    for text in pages {
        let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        page_ids.push(doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        }));
    }

    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(pages.len() as i64),
    });
    for page_id in &page_ids {
        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*page_id) {
            dict.set("Parent", pages_id);
        }
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

// ── OOXML ────────────────────────────────────────────────────────────────────

pub fn zip_of(parts: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in parts {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A DOCX whose body holds one paragraph per entry.
pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let xml = format!(
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    );
    zip_of(&[("word/document.xml", &xml)])
}

/// A PPTX with one slide per entry, each slide one paragraph per line.
pub fn pptx(slides: &[&[&str]]) -> Vec<u8> {
    let xml: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, lines)| {
            let paras: String = lines
                .iter()
                .map(|t| format!("<a:p><a:r><a:t>{t}</a:t></a:r></a:p>"))
                .collect();
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    r#"<p:sld xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><p:cSld><p:spTree><p:sp><p:txBody>{paras}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
                ),
            )
        })
        .collect();
    let ids: String = (1..=slides.len())
        .map(|i| format!(r#"<p:sldId id="{}" r:id="rId{i}"/>"#, 255 + i))
        .collect();
    let presentation = format!(
        r#"<p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><p:sldIdLst>{ids}</p:sldIdLst></p:presentation>"#
    );
    let rels: String = (1..=slides.len())
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{i}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="slides/slide{i}.xml"/>"#
            )
        })
        .collect();
    let rels = format!(
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
    );
    let mut parts: Vec<(&str, &str)> = vec![
        ("ppt/presentation.xml", presentation.as_str()),
        ("ppt/_rels/presentation.xml.rels", rels.as_str()),
    ];
    parts.extend(xml.iter().map(|(n, b)| (n.as_str(), b.as_str())));
    zip_of(&parts)
}

// ── OLE2 (Word 97 / PowerPoint 97) ───────────────────────────────────────────

pub fn compound(streams: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut file = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    for (path, data) in streams {
        let mut s = file.create_stream(path).unwrap();
        s.write_all(data).unwrap();
        s.flush().unwrap();
    }
    file.flush().unwrap();
    file.into_inner().into_inner()
}

/// A Word 97 document holding `text` (ASCII) as one 8-bit piece.
///
/// Paragraphs are separated with `\r`, as Word stores them.
pub fn doc(text: &str) -> Vec<u8> {
    const TEXT_AT: usize = 1024;
    const CSW: usize = 14;
    const CSLW: usize = 22;
    const PAIRS: usize = 93;

    let mut word = vec![0u8; TEXT_AT];
    word[0..2].copy_from_slice(&0xA5ECu16.to_le_bytes());
    // fWhichTblStm: the piece table lives in 1Table
    word[0x0A..0x0C].copy_from_slice(&0x0200u16.to_le_bytes());
    word[32..34].copy_from_slice(&(CSW as u16).to_le_bytes());
    let lw_at = 34 + CSW * 2;
    word[lw_at..lw_at + 2].copy_from_slice(&(CSLW as u16).to_le_bytes());
    let ccp_at = lw_at + 2 + 3 * 4;
    word[ccp_at..ccp_at + 4].copy_from_slice(&(text.len() as u32).to_le_bytes());
    let fc_at = lw_at + 2 + CSLW * 4;
    word[fc_at..fc_at + 2].copy_from_slice(&(PAIRS as u16).to_le_bytes());
    let clx_at = fc_at + 2 + 33 * 8;

    let mut plc = Vec::new();
    plc.extend_from_slice(&0u32.to_le_bytes());
    plc.extend_from_slice(&(text.len() as u32).to_le_bytes());
    plc.extend_from_slice(&0u16.to_le_bytes());
    plc.extend_from_slice(&(((TEXT_AT * 2) as u32) | 0x4000_0000).to_le_bytes());
    plc.extend_from_slice(&0u16.to_le_bytes());
    let mut clx = vec![0x02];
    clx.extend_from_slice(&(plc.len() as u32).to_le_bytes());
    clx.extend_from_slice(&plc);

    word[clx_at..clx_at + 4].copy_from_slice(&0u32.to_le_bytes());
    word[clx_at + 4..clx_at + 8].copy_from_slice(&(clx.len() as u32).to_le_bytes());
    word.extend_from_slice(text.as_bytes());

    compound(&[("/WordDocument", word), ("/1Table", clx)])
}

fn record(ver_inst: u16, rec_type: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&ver_inst.to_le_bytes());
    out.extend_from_slice(&rec_type.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// A PowerPoint 97 file with one slide per entry in its slide list.
pub fn ppt(slides: &[&str]) -> Vec<u8> {
    const DOCUMENT: u16 = 0x03E8;
    const SLIDE_LIST: u16 = 0x0FF0;
    const SLIDE_PERSIST: u16 = 0x03F3;
    const TEXT_CHARS: u16 = 0x0FA0;

    let mut list = Vec::new();
    for text in slides {
        list.extend(record(0, SLIDE_PERSIST, &[0u8; 20]));
        let body: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        list.extend(record(0, TEXT_CHARS, &body));
    }
    let stream = record(0x000F, DOCUMENT, &record(0x000F, SLIDE_LIST, &list));
    compound(&[("/PowerPoint Document", stream)])
}

// ── Test doubles ─────────────────────────────────────────────────────────────

/// A well-formed reply naming `subject` with `topics` topics in one chapter.
pub fn reply(subject: &str, topics: usize) -> String {
    let topics: Vec<serde_json::Value> = (1..=topics)
        .map(|i| {
            serde_json::json!({
                "topic_id": format!("topic_{i}"),
                "title": format!("Topic {i}"),
                "content": format!("Explanation of topic {i}."),
                "examples": [format!("Example {i}")],
                "real_world_applications": [],
                "keywords": ["k"],
            })
        })
        .collect();
    serde_json::json!({
        subject: {
            "title": subject,
            "description": format!("An introduction to {subject}."),
            "chapters": [{ "title": "Basics", "topics": topics }],
        }
    })
    .to_string()
}

/// Replies from a script (repeating the last entry) and records every request.
pub struct ScriptedClient {
    replies: Vec<Result<String, AiError>>,
    calls: AtomicU32,
    requests: Mutex<Vec<ConversionRequest>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Result<String, AiError>>) -> Arc<Self> {
        Arc::new(Self {
            replies,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(reply: Result<String, AiError>) -> Arc<Self> {
        Self::new(vec![reply])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConversionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiClient for ScriptedClient {
    async fn convert(&self, request: &ConversionRequest) -> Result<String, AiError> {
        self.requests.lock().unwrap().push(request.clone());
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.replies[n.min(self.replies.len() - 1)].clone()
    }
}

/// Wraps [`OfficeReader`] and counts extractions.
#[derive(Default)]
pub struct CountingReader {
    calls: AtomicU32,
}

impl CountingReader {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FormatReader for CountingReader {
    fn extract(&self, document: Document) -> Result<ExtractedText, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        OfficeReader.extract(document)
    }
}
