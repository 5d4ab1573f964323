//! Office Open XML (DOCX / PPTX) text extraction.
//!
//! Both formats are ZIP archives of XML parts. We stream each part through
//! `quick-xml` and keep only text runs, tracking just enough element state
//! to know where paragraphs, table cells and rows begin and end. Element
//! names are matched on their local part so `w:p` and `a:p` share code.
//!
//! Text boxes put whole paragraphs inside a run of another paragraph; their
//! text is emitted right after the enclosing paragraph. `mc:Fallback`
//! subtrees repeat the content of the matching `mc:Choice` and are skipped.

use crate::error::ExtractError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

/// Largest XML part we are willing to inflate.
const MAX_PART_BYTES: u64 = 256 * 1024 * 1024;

const DOCX_BODY: &str = "word/document.xml";
const PPTX_ROOT: &str = "ppt/presentation.xml";
const PPTX_RELS: &str = "ppt/_rels/presentation.xml.rels";
const SLIDE_PREFIX: &str = "ppt/slides/slide";

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Paragraph texts of the main document body, tables rendered as
/// `cell | cell` rows, separated by blank lines.
pub(super) fn docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open(bytes, "DOCX")?;
    let xml = read_part(&mut archive, DOCX_BODY, "DOCX")?;
    let units = docx_units(&xml).map_err(|e| ExtractError::corrupt("DOCX", e))?;
    debug!("DOCX: {} text units", units.len());
    Ok(units.join("\n\n"))
}

/// One block per slide with text, headed `--- Slide N ---`, in
/// presentation order.
pub(super) fn pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open(bytes, "PPTX")?;

    let slides = match presentation_order(&mut archive) {
        Some(order) if !order.is_empty() => order,
        _ => numbered_slides(&archive),
    };
    if slides.is_empty() && archive.index_for_name(PPTX_ROOT).is_none() {
        return Err(ExtractError::corrupt("PPTX", "no presentation part"));
    }

    let mut blocks = Vec::with_capacity(slides.len());
    for (position, name) in slides.iter().enumerate() {
        let xml = read_part(&mut archive, name, "PPTX")?;
        let lines = slide_lines(&xml).map_err(|e| ExtractError::corrupt("PPTX", e))?;
        if !lines.is_empty() {
            blocks.push(format!("--- Slide {} ---\n{}", position + 1, lines.join("\n")));
        }
    }
    debug!("PPTX: {} of {} slides carry text", blocks.len(), slides.len());
    Ok(blocks.join("\n\n"))
}

/// Slide parts listed in `p:sldIdLst`, resolved through the presentation's
/// relationships. `None` when either part is missing or unreadable.
fn presentation_order(archive: &mut Archive<'_>) -> Option<Vec<String>> {
    let presentation = read_part(archive, PPTX_ROOT, "PPTX").ok()?;
    let rels = read_part(archive, PPTX_RELS, "PPTX").ok()?;
    let ids = slide_rel_ids(&presentation).ok()?;
    let targets = relationship_targets(&rels).ok()?;

    let slides: Vec<String> = ids
        .iter()
        .filter_map(|id| targets.get(id))
        .map(|target| resolve_target("ppt", target))
        .filter(|name| archive.index_for_name(name).is_some())
        .collect();
    if slides.len() != ids.len() {
        debug!("PPTX: {} of {} listed slides resolved", slides.len(), ids.len());
    }
    Some(slides)
}

/// `ppt/slides/slideN.xml` parts ordered by N.
fn numbered_slides(archive: &Archive<'_>) -> Vec<String> {
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name.strip_prefix(SLIDE_PREFIX)?.strip_suffix(".xml")?;
            Some((n.parse().ok()?, name.to_string()))
        })
        .collect();
    slides.sort_unstable_by_key(|(n, _)| *n);
    slides.into_iter().map(|(_, name)| name).collect()
}

/// Relationship ids of `p:sldId` entries, in list order.
fn slide_rel_ids(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut ids = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sldId" => {
                // The bare `id` is the slide id; the prefixed one is the relationship.
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.prefix().is_some() && attr.key.local_name().as_ref() == b"id" {
                        ids.push(attr.unescape_value()?.into_owned());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ids)
}

/// `Id → Target` for every relationship in a `.rels` part.
fn relationship_targets(xml: &str) -> Result<HashMap<String, String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut targets = HashMap::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attribute(&e, b"Id")?, attribute(&e, b"Target")?) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(targets)
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    match e.try_get_attribute(name)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    let (mut parts, rest): (Vec<&str>, &str) = match target.strip_prefix('/') {
        Some(absolute) => (Vec::new(), absolute),
        None => (base_dir.split('/').filter(|p| !p.is_empty()).collect(), target),
    };
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn open<'a>(bytes: &'a [u8], format: &'static str) -> Result<Archive<'a>, ExtractError> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::corrupt(format, e))
}

fn read_part(
    archive: &mut Archive<'_>,
    name: &str,
    format: &'static str,
) -> Result<String, ExtractError> {
    let part = archive
        .by_name(name)
        .map_err(|e| ExtractError::corrupt(format, format!("{name}: {e}")))?;
    if part.size() > MAX_PART_BYTES {
        return Err(ExtractError::corrupt(
            format,
            format!("{name} inflates to {} bytes", part.size()),
        ));
    }
    let mut xml = String::new();
    part.take(MAX_PART_BYTES)
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::corrupt(format, format!("{name}: {e}")))?;
    Ok(xml)
}

#[derive(Default)]
struct OpenParagraph {
    text: String,
    /// Finished units from text boxes inside this paragraph.
    nested: Vec<String>,
}

struct OpenTable {
    /// Open paragraphs when the table started.
    depth: usize,
    row: Vec<String>,
    cell: String,
}

/// Where a finished unit goes: after the enclosing paragraph, or the body.
fn sink<'a>(paras: &'a mut [OpenParagraph], units: &'a mut Vec<String>) -> &'a mut Vec<String> {
    match paras.last_mut() {
        Some(para) => &mut para.nested,
        None => units,
    }
}

/// Walk `word/document.xml`.
fn docx_units(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut units = Vec::new();
    let mut paras: Vec<OpenParagraph> = Vec::new();
    let mut tables: Vec<OpenTable> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => paras.push(OpenParagraph::default()),
                b"tbl" => tables.push(OpenTable {
                    depth: paras.len(),
                    row: Vec::new(),
                    cell: String::new(),
                }),
                b"Fallback" => {
                    let end = e.to_end().into_owned();
                    reader.read_to_end(end.name())?;
                }
                _ => {}
            },
            Event::Empty(e) => {
                if let Some(para) = paras.last_mut() {
                    match e.local_name().as_ref() {
                        b"tab" => para.text.push('\t'),
                        b"br" | b"cr" => para.text.push('\n'),
                        _ => {}
                    }
                }
            }
            Event::Text(t) if in_text => {
                if let Some(para) = paras.last_mut() {
                    para.text.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let Some(para) = paras.pop() else {
                        continue;
                    };
                    let text = para.text.trim();
                    match tables.last_mut() {
                        Some(table) if table.depth == paras.len() => {
                            let pieces = std::iter::once(text).chain(para.nested.iter().map(String::as_str));
                            for piece in pieces.filter(|p| !p.is_empty()) {
                                if !table.cell.is_empty() {
                                    table.cell.push(' ');
                                }
                                table.cell.push_str(piece);
                            }
                        }
                        _ => {
                            let out = sink(&mut paras, &mut units);
                            if !text.is_empty() {
                                out.push(text.to_string());
                            }
                            out.extend(para.nested);
                        }
                    }
                }
                b"tc" => {
                    if let Some(table) = tables.last_mut() {
                        let cell = std::mem::take(&mut table.cell);
                        if !cell.trim().is_empty() {
                            table.row.push(cell.trim().to_string());
                        }
                    }
                }
                b"tr" => {
                    if let Some(table) = tables.last_mut() {
                        if !table.row.is_empty() {
                            let line = table.row.join(" | ");
                            table.row.clear();
                            sink(&mut paras, &mut units).push(line);
                        }
                    }
                }
                b"tbl" => {
                    tables.pop();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(units)
}

/// Non-empty paragraph lines of one slide, in document order.
fn slide_lines(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut lines = Vec::new();
    let mut para = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => para.clear(),
                b"Fallback" => {
                    let end = e.to_end().into_owned();
                    reader.read_to_end(end.name())?;
                }
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"br" => para.push('\n'),
            Event::Text(t) if in_text => para.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = para.trim();
                    if !text.is_empty() {
                        lines.push(text.to_string());
                    }
                    para.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn zip_of(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    const W: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    #[test]
    fn docx_paragraphs_and_tables_in_order() {
        let body = format!(
            r#"<w:document {W}><w:body>
                <w:p><w:r><w:t>Newton&apos;s laws</w:t></w:r></w:p>
                <w:p><w:r><w:t xml:space="preserve">First </w:t></w:r><w:r><w:t>law</w:t></w:r></w:p>
                <w:p/>
                <w:tbl>
                  <w:tr><w:tc><w:p><w:r><w:t>Law</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Formula</w:t></w:r></w:p></w:tc></w:tr>
                  <w:tr><w:tc><w:p><w:r><w:t>Second</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>F = ma</w:t></w:r></w:p></w:tc></w:tr>
                </w:tbl>
                <w:p><w:r><w:t>After</w:t><w:tab/><w:t>table</w:t></w:r></w:p>
            </w:body></w:document>"#
        );
        let bytes = zip_of(&[(DOCX_BODY, &body)]);
        assert_eq!(
            docx(&bytes).unwrap(),
            "Newton's laws\n\nFirst law\n\nLaw | Formula\n\nSecond | F = ma\n\nAfter\ttable"
        );
    }

    #[test]
    fn docx_text_box_follows_its_paragraph_once() {
        let body = format!(
            r#"<w:document {W}
                  xmlns:mc="http://schemas.openxmlformats.org/markup-compatibility/2006"
                  xmlns:wps="http://schemas.microsoft.com/office/word/2010/wordprocessingShape"
                  xmlns:v="urn:schemas-microsoft-com:vml"><w:body>
                <w:p>
                  <w:r><w:t>Photosynthesis happens in chloroplasts.</w:t></w:r>
                  <w:r><mc:AlternateContent>
                    <mc:Choice Requires="wps"><w:drawing><wps:txbx><w:txbxContent>
                      <w:p><w:r><w:t>Figure 1</w:t></w:r></w:p>
                    </w:txbxContent></wps:txbx></w:drawing></mc:Choice>
                    <mc:Fallback><w:pict><v:textbox><w:txbxContent>
                      <w:p><w:r><w:t>Figure 1</w:t></w:r></w:p>
                    </w:txbxContent></v:textbox></w:pict></mc:Fallback>
                  </mc:AlternateContent></w:r>
                  <w:r><w:t xml:space="preserve"> Light drives it.</w:t></w:r>
                </w:p>
                <w:p><w:r><w:t>Next</w:t></w:r></w:p>
            </w:body></w:document>"#
        );
        let bytes = zip_of(&[(DOCX_BODY, &body)]);
        assert_eq!(
            docx(&bytes).unwrap(),
            "Photosynthesis happens in chloroplasts. Light drives it.\n\nFigure 1\n\nNext"
        );
    }

    #[test]
    fn docx_without_body_is_corrupt() {
        let bytes = zip_of(&[("word/styles.xml", "<styles/>")]);
        let err = docx(&bytes).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"), "{err}");
    }

    #[test]
    fn docx_with_broken_xml_is_corrupt() {
        let body = format!("<w:document {W}><w:body><w:p><w:t>open</w:p></w:document>");
        let bytes = zip_of(&[(DOCX_BODY, &body)]);
        assert!(matches!(
            docx(&bytes),
            Err(ExtractError::CorruptFile { format: "DOCX", .. })
        ));
    }

    fn slide(texts: &[&str]) -> String {
        let paras: String = texts
            .iter()
            .map(|t| format!("<a:p><a:r><a:t>{t}</a:t></a:r></a:p>"))
            .collect();
        format!(
            r#"<p:sld xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"
                      xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">
               <p:cSld><p:spTree><p:sp><p:txBody>{paras}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
        )
    }

    #[test]
    fn pptx_without_relationships_sorts_numerically_and_skips_empty() {
        let s1 = slide(&["Cells", "The unit of life"]);
        let s2 = slide(&[]);
        let s10 = slide(&["Summary"]);
        let bytes = zip_of(&[
            (PPTX_ROOT, "<p:presentation/>"),
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide1.xml", &s1),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/_rels/slide1.xml.rels", "<Relationships/>"),
        ]);
        assert_eq!(
            pptx(&bytes).unwrap(),
            "--- Slide 1 ---\nCells\nThe unit of life\n\n--- Slide 3 ---\nSummary"
        );
    }

    const P: &str = r#"xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"
        xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

    #[test]
    fn pptx_follows_presentation_slide_list() {
        let presentation = format!(
            r#"<p:presentation {P}><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst>
               <p:sldIdLst><p:sldId id="257" r:id="rId3"/><p:sldId id="256" r:id="rId2"/></p:sldIdLst></p:presentation>"#
        );
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster" Target="slideMasters/slideMaster1.xml"/>
            <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="slides/slide1.xml"/>
            <Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="/ppt/slides/slide2.xml"/>
        </Relationships>"#;
        let conclusion = slide(&["Conclusion"]);
        let introduction = slide(&["Introduction"]);
        let bytes = zip_of(&[
            (PPTX_ROOT, &presentation),
            (PPTX_RELS, rels),
            ("ppt/slides/slide1.xml", &conclusion),
            ("ppt/slides/slide2.xml", &introduction),
        ]);
        assert_eq!(
            pptx(&bytes).unwrap(),
            "--- Slide 1 ---\nIntroduction\n\n--- Slide 2 ---\nConclusion"
        );
    }

    #[test]
    fn relationship_targets_resolve_against_ppt_dir() {
        assert_eq!(resolve_target("ppt", "slides/slide3.xml"), "ppt/slides/slide3.xml");
        assert_eq!(resolve_target("ppt", "/ppt/slides/slide3.xml"), "ppt/slides/slide3.xml");
        assert_eq!(resolve_target("ppt", "../ppt/./slides/slide3.xml"), "ppt/slides/slide3.xml");
    }

    #[test]
    fn zip_without_presentation_is_corrupt() {
        let bytes = zip_of(&[("hello.txt", "hi")]);
        assert!(pptx(&bytes).is_err());
    }
}
