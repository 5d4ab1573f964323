//! Legacy binary Office formats (Word 97-2003 `.doc`, PowerPoint 97-2003
//! `.ppt`) stored in OLE2 compound files.
//!
//! ## Word
//!
//! The text of a `.doc` lives in the `WordDocument` stream, but not
//! contiguously: the piece table (the `Clx` structure in the `0Table` or
//! `1Table` stream) maps character positions to byte ranges, each either
//! UTF-16LE or "compressed" 8-bit. We read the File Information Block to find
//! the Clx, walk the pieces covering the main document text and map Word's
//! control characters to plain-text equivalents.
//!
//! ## PowerPoint
//!
//! The `PowerPoint Document` stream is a tree of records. Slide order comes
//! from the `SlidePersistAtom`s in the document's slide list. Text sits in
//! `TextCharsAtom` (UTF-16LE) and `TextBytesAtom` (8-bit) records, either
//! right after a slide's persist atom or inside the slide's own container.
//! The container is found through the persist directory, which the
//! `Current User` stream points at via the chain of `UserEditAtom`s. Newer
//! edits shadow older ones, so stale slide copies and title masters left in
//! the stream are never read.

use crate::error::ExtractError;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Seek};
use tracing::debug;

/// Largest stream we read into memory.
const MAX_STREAM_BYTES: u64 = 512 * 1024 * 1024;

// ── Word ─────────────────────────────────────────────────────────────────────

const WORD_IDENT: u16 = 0xA5EC;
const FLAG_ENCRYPTED: u16 = 0x0100;
const FLAG_WHICH_TABLE: u16 = 0x0200;
/// `ccpText` index within FibRgLw97.
const CCP_TEXT_INDEX: usize = 3;
/// `fcClx`/`lcbClx` pair index within FibRgFcLcb97.
const CLX_PAIR_INDEX: usize = 33;
const PIECE_COMPRESSED: u32 = 0x4000_0000;

pub(super) fn doc(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut file = open(bytes, "DOC")?;
    let word = read_stream(&mut file, "/WordDocument", "DOC")?;
    let fib = Fib::parse(&word)?;
    let table_name = if fib.which_table { "/1Table" } else { "/0Table" };
    let table = read_stream(&mut file, table_name, "DOC")?;

    let clx = slice(&table, fib.fc_clx as usize, fib.lcb_clx as usize)
        .ok_or_else(|| ExtractError::corrupt("DOC", "piece table outside table stream"))?;
    let pieces = piece_table(clx)?;
    let covered = pieces.last().map_or(0, |p| p.cp_end);
    if fib.ccp_text > covered {
        return Err(ExtractError::corrupt(
            "DOC",
            format!("text length {} exceeds piece table ({covered})", fib.ccp_text),
        ));
    }

    let mut raw = String::with_capacity((fib.ccp_text as usize).min(word.len()));
    for piece in &pieces {
        if piece.cp_start >= fib.ccp_text {
            break;
        }
        let chars = (piece.cp_end.min(fib.ccp_text) - piece.cp_start) as usize;
        piece.decode_into(&word, chars, &mut raw)?;
    }
    debug!("DOC: {} pieces, {} chars", pieces.len(), raw.chars().count());
    Ok(map_word_controls(&raw))
}

struct Fib {
    which_table: bool,
    ccp_text: u32,
    fc_clx: u32,
    lcb_clx: u32,
}

impl Fib {
    fn parse(word: &[u8]) -> Result<Self, ExtractError> {
        let bad = |what: &str| ExtractError::corrupt("DOC", format!("invalid FIB: {what}"));

        if u16_at(word, 0) != Some(WORD_IDENT) {
            return Err(bad("not a Word binary document"));
        }
        let flags = u16_at(word, 0x0A).ok_or_else(|| bad("truncated header"))?;
        if flags & FLAG_ENCRYPTED != 0 {
            return Err(ExtractError::corrupt("DOC", "document is password-protected"));
        }

        // FibBase (32 bytes), then three length-prefixed arrays.
        let csw = u16_at(word, 32).ok_or_else(|| bad("missing fibRgW"))? as usize;
        let lw_at = 34 + csw * 2;
        let cslw = u16_at(word, lw_at).ok_or_else(|| bad("missing fibRgLw"))? as usize;
        if cslw <= CCP_TEXT_INDEX {
            return Err(bad("fibRgLw too short"));
        }
        let ccp_text =
            u32_at(word, lw_at + 2 + CCP_TEXT_INDEX * 4).ok_or_else(|| bad("missing ccpText"))?;
        let fc_at = lw_at + 2 + cslw * 4;
        let pairs = u16_at(word, fc_at).ok_or_else(|| bad("missing fibRgFcLcb"))? as usize;
        if pairs <= CLX_PAIR_INDEX {
            return Err(bad("fibRgFcLcb too short"));
        }
        let clx_at = fc_at + 2 + CLX_PAIR_INDEX * 8;
        let fc_clx = u32_at(word, clx_at).ok_or_else(|| bad("missing fcClx"))?;
        let lcb_clx = u32_at(word, clx_at + 4).ok_or_else(|| bad("missing lcbClx"))?;

        Ok(Fib {
            which_table: flags & FLAG_WHICH_TABLE != 0,
            ccp_text,
            fc_clx,
            lcb_clx,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Piece {
    cp_start: u32,
    cp_end: u32,
    /// Byte offset into the WordDocument stream.
    offset: usize,
    compressed: bool,
}

impl Piece {
    fn decode_into(&self, word: &[u8], chars: usize, out: &mut String) -> Result<(), ExtractError> {
        let width = if self.compressed { 1 } else { 2 };
        let bytes = slice(word, self.offset, chars * width)
            .ok_or_else(|| ExtractError::corrupt("DOC", "text piece outside WordDocument stream"))?;
        if self.compressed {
            out.extend(bytes.iter().map(|&b| cp1252(b)));
        } else {
            let units = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]));
            out.extend(char::decode_utf16(units).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)));
        }
        Ok(())
    }
}

/// Parse the Clx: skip property runs (`Prc`, 0x01), then read the `Pcdt` (0x02).
fn piece_table(clx: &[u8]) -> Result<Vec<Piece>, ExtractError> {
    let bad = |what: &str| ExtractError::corrupt("DOC", format!("invalid piece table: {what}"));
    let mut pos = 0;
    loop {
        match clx.get(pos) {
            Some(0x01) => {
                let cb = u16_at(clx, pos + 1).ok_or_else(|| bad("truncated Prc"))? as usize;
                pos += 3 + cb;
            }
            Some(0x02) => break,
            Some(_) => return Err(bad("unexpected entry")),
            None => return Err(bad("no Pcdt")),
        }
    }

    let lcb = u32_at(clx, pos + 1).ok_or_else(|| bad("truncated Pcdt"))? as usize;
    let plc = slice(clx, pos + 5, lcb).ok_or_else(|| bad("PlcPcd overruns Clx"))?;
    // (n + 1) CPs of 4 bytes, then n piece descriptors of 8 bytes.
    if plc.len() < 4 || (plc.len() - 4) % 12 != 0 {
        return Err(bad("PlcPcd has odd length"));
    }
    let n = (plc.len() - 4) / 12;
    let cp = |i: usize| u32_at(plc, i * 4).unwrap_or(0);

    let mut pieces = Vec::with_capacity(n);
    for i in 0..n {
        let (cp_start, cp_end) = (cp(i), cp(i + 1));
        if cp_end < cp_start {
            return Err(bad("character positions go backwards"));
        }
        let fc = u32_at(plc, (n + 1) * 4 + i * 8 + 2).ok_or_else(|| bad("truncated Pcd"))?;
        let compressed = fc & PIECE_COMPRESSED != 0;
        let fc = fc & !PIECE_COMPRESSED;
        pieces.push(Piece {
            cp_start,
            cp_end,
            offset: if compressed { fc as usize / 2 } else { fc as usize },
            compressed,
        });
    }
    Ok(pieces)
}

/// Map Word's in-text control characters to plain text and drop field codes.
fn map_word_controls(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    // One entry per open field: true while still inside its instruction part.
    let mut fields: Vec<bool> = Vec::new();
    for c in raw.chars() {
        match c {
            '\u{13}' => fields.push(true),
            '\u{14}' => {
                if let Some(top) = fields.last_mut() {
                    *top = false;
                }
            }
            '\u{15}' => {
                fields.pop();
            }
            _ if fields.iter().any(|&in_instruction| in_instruction) => {}
            '\r' | '\n' | '\u{0B}' | '\u{0C}' => out.push('\n'),
            '\u{07}' => out.push('\t'),
            '\u{1E}' => out.push('-'),
            '\t' => out.push('\t'),
            c if c.is_control() || c == '\u{1F}' => {}
            c => out.push(c),
        }
    }
    out
}

/// Windows-1252 for the bytes where it differs from Latin-1.
fn cp1252(b: u8) -> char {
    match b {
        0x80 => '€',
        0x85 => '…',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '•',
        0x96 => '–',
        0x97 => '—',
        0x99 => '™',
        b => b as char,
    }
}

// ── PowerPoint ───────────────────────────────────────────────────────────────

const RT_DOCUMENT: u16 = 0x03E8;
const RT_SLIDE: u16 = 0x03EE;
const RT_NOTES: u16 = 0x03F0;
const RT_SLIDE_PERSIST: u16 = 0x03F3;
const RT_MAIN_MASTER: u16 = 0x03F8;
const RT_TEXT_CHARS: u16 = 0x0FA0;
const RT_TEXT_BYTES: u16 = 0x0FA8;
const RT_HANDOUT: u16 = 0x0FC9;
const RT_SLIDE_LIST: u16 = 0x0FF0;
const RT_USER_EDIT: u16 = 0x0FF5;
const RT_CURRENT_USER: u16 = 0x0FF6;
const RT_PERSIST_DIRECTORY: u16 = 0x1772;
const CONTAINER_VERSION: u16 = 0x000F;
const HEADER_LEN: usize = 8;
const MAX_DEPTH: usize = 32;
/// Longest `UserEditAtom` chain we follow.
const MAX_EDITS: usize = 1024;

pub(super) fn ppt(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut file = open(bytes, "PPT")?;
    let stream = read_stream(&mut file, "/PowerPoint Document", "PPT")?;
    let directory = read_stream(&mut file, "/Current User", "PPT")
        .ok()
        .and_then(|user| PersistDirectory::load(&user, &stream));
    if directory.is_none() {
        debug!("PPT: no persist directory, reading the slide list only");
    }

    let document = directory
        .as_ref()
        .and_then(|d| d.record(&stream, d.document))
        .filter(|r| r.rec_type == RT_DOCUMENT)
        .or_else(|| records(&stream).filter(|r| r.rec_type == RT_DOCUMENT).last());

    let mut slides = document.map_or_else(Vec::new, |d| slide_list(d.body));
    if let Some(ref directory) = directory {
        for slide in &mut slides {
            if let Some(container) = directory
                .record(&stream, slide.persist_id)
                .filter(|r| r.rec_type == RT_SLIDE)
            {
                collect_text(container.body, 0, &mut slide.lines);
            }
        }
    }

    let blocks: Vec<String> = slides
        .iter()
        .enumerate()
        .filter(|(_, slide)| !slide.lines.is_empty())
        .map(|(i, slide)| format!("--- Slide {} ---\n{}", i + 1, slide.lines.join("\n")))
        .collect();
    debug!("PPT: {} of {} slides carry text", blocks.len(), slides.len());
    if blocks.is_empty() {
        // No usable slide list: keep whatever text is outside masters and notes.
        let mut loose = Vec::new();
        collect_text(&stream, 0, &mut loose);
        debug!("PPT: {} loose runs", loose.len());
        return Ok(loose.join("\n"));
    }
    Ok(blocks.join("\n\n"))
}

/// One record: header fields plus its body, clipped to the enclosing data.
struct Record<'a> {
    rec_type: u16,
    version: u16,
    instance: u16,
    body: &'a [u8],
}

fn record_at(data: &[u8], at: usize) -> Option<(Record<'_>, usize)> {
    let ver_inst = u16_at(data, at)?;
    let rec_type = u16_at(data, at + 2)?;
    let len = u32_at(data, at + 4)? as usize;
    let body_start = at + HEADER_LEN;
    let body_end = body_start.saturating_add(len).min(data.len());
    let record = Record {
        rec_type,
        version: ver_inst & 0x000F,
        instance: ver_inst >> 4,
        body: &data[body_start..body_end],
    };
    Some((record, body_end))
}

/// Sibling records in `data`, in order.
fn records(data: &[u8]) -> impl Iterator<Item = Record<'_>> {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let (record, next) = record_at(data, pos)?;
        pos = next;
        Some(record)
    })
}

/// Persist id → stream offset, merged across every saved edit.
struct PersistDirectory {
    offsets: HashMap<u32, usize>,
    /// Persist id of the current document container.
    document: u32,
}

impl PersistDirectory {
    fn load(current_user: &[u8], stream: &[u8]) -> Option<Self> {
        let (user, _) = record_at(current_user, 0)?;
        if user.rec_type != RT_CURRENT_USER {
            return None;
        }
        let mut edit_at = u32_at(user.body, 8)? as usize;
        let mut offsets = HashMap::new();
        let mut document = None;
        let mut seen = HashSet::new();

        for _ in 0..MAX_EDITS {
            if !seen.insert(edit_at) {
                break;
            }
            let (edit, _) = record_at(stream, edit_at)?;
            if edit.rec_type != RT_USER_EDIT {
                break;
            }
            let last_edit = u32_at(edit.body, 8)? as usize;
            let directory_at = u32_at(edit.body, 12)? as usize;
            document.get_or_insert(u32_at(edit.body, 16)?);

            if let Some((dir, _)) = record_at(stream, directory_at) {
                if dir.rec_type == RT_PERSIST_DIRECTORY {
                    read_persist_entries(dir.body, &mut offsets);
                }
            }
            if last_edit == 0 {
                break;
            }
            edit_at = last_edit;
        }
        Some(Self {
            offsets,
            document: document?,
        })
    }

    fn record<'a>(&self, stream: &'a [u8], persist_id: u32) -> Option<Record<'a>> {
        let at = *self.offsets.get(&persist_id)?;
        record_at(stream, at).map(|(record, _)| record)
    }
}

/// Runs of `(first id: 20 bits, count: 12 bits)` followed by `count` offsets.
/// Entries already present come from a newer edit and win.
fn read_persist_entries(body: &[u8], offsets: &mut HashMap<u32, usize>) {
    let mut pos = 0;
    while let Some(head) = u32_at(body, pos) {
        pos += 4;
        let first = head & 0x000F_FFFF;
        let count = head >> 20;
        for k in 0..count {
            let Some(offset) = u32_at(body, pos) else {
                return;
            };
            pos += 4;
            offsets.entry(first + k).or_insert(offset as usize);
        }
    }
}

struct SlideText {
    persist_id: u32,
    lines: Vec<String>,
}

/// Slides of the slide list (instance 0), with the text stored alongside them.
fn slide_list(document: &[u8]) -> Vec<SlideText> {
    let mut slides: Vec<SlideText> = Vec::new();
    for list in records(document).filter(|r| r.rec_type == RT_SLIDE_LIST && r.instance == 0) {
        for record in records(list.body) {
            match record.rec_type {
                RT_SLIDE_PERSIST => slides.push(SlideText {
                    persist_id: u32_at(record.body, 0).unwrap_or(0),
                    lines: Vec::new(),
                }),
                RT_TEXT_CHARS | RT_TEXT_BYTES => {
                    if let (Some(slide), Some(text)) = (slides.last_mut(), text_atom(&record)) {
                        push_line(&mut slide.lines, &text);
                    }
                }
                _ => {}
            }
        }
    }
    slides
}

/// Text atoms anywhere below `data`, skipping masters, notes and handouts.
fn collect_text(data: &[u8], depth: usize, lines: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    for record in records(data) {
        match record.rec_type {
            RT_MAIN_MASTER | RT_NOTES | RT_HANDOUT => {}
            RT_SLIDE_LIST if record.instance != 0 => {}
            _ => {
                if let Some(text) = text_atom(&record) {
                    push_line(lines, &text);
                } else if record.version == CONTAINER_VERSION {
                    collect_text(record.body, depth + 1, lines);
                }
            }
        }
    }
}

fn text_atom(record: &Record<'_>) -> Option<String> {
    match record.rec_type {
        RT_TEXT_CHARS => {
            let units = record.body.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]));
            Some(
                char::decode_utf16(units)
                    .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect(),
            )
        }
        RT_TEXT_BYTES => Some(record.body.iter().map(|&b| cp1252(b)).collect()),
        _ => None,
    }
}

fn push_line(lines: &mut Vec<String>, text: &str) {
    let text = text.replace(['\r', '\u{0B}'], "\n");
    let text = text.trim();
    // Placeholder text can appear both in the slide list and the drawing.
    if !text.is_empty() && !lines.iter().any(|l| l == text) {
        lines.push(text.to_string());
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

fn open<'a>(
    bytes: &'a [u8],
    format: &'static str,
) -> Result<cfb::CompoundFile<Cursor<&'a [u8]>>, ExtractError> {
    cfb::CompoundFile::open(Cursor::new(bytes)).map_err(|e| ExtractError::corrupt(format, e))
}

fn read_stream<F: Read + Seek>(
    file: &mut cfb::CompoundFile<F>,
    path: &str,
    format: &'static str,
) -> Result<Vec<u8>, ExtractError> {
    let stream = file
        .open_stream(path)
        .map_err(|e| ExtractError::corrupt(format, format!("{}: {e}", path.trim_start_matches('/'))))?;
    let mut buf = Vec::new();
    stream
        .take(MAX_STREAM_BYTES)
        .read_to_end(&mut buf)
        .map_err(|e| ExtractError::corrupt(format, e))?;
    Ok(buf)
}

fn slice(data: &[u8], start: usize, len: usize) -> Option<&[u8]> {
    data.get(start..start.checked_add(len)?)
}

fn u16_at(data: &[u8], at: usize) -> Option<u16> {
    slice(data, at, 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(data: &[u8], at: usize) -> Option<u32> {
    slice(data, at, 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
