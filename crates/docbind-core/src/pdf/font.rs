//! Fonts for header text.
//!
//! Without configuration the header uses the standard Helvetica face with
//! WinAnsi encoding, which every viewer provides and which needs no embedding.
//! Text outside WinAnsi (CJK titles, for instance) needs a TrueType face,
//! embedded as a composite font:
//!
//! - **Type0 font** with `Identity-H` encoding, referencing
//!   - **CIDFontType2** with per-glyph widths, referencing
//!     - **FontDescriptor** and the **FontFile2** program
//!   - **ToUnicode CMap** so the header text can be copied back out

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use ttf_parser::{Face, GlyphId};

use crate::error::{Error, Result};

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // space../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];

/// Width used for Latin-1 characters beyond ASCII.
const HELVETICA_DEFAULT_WIDTH: u16 = 556;

/// Header font: built-in Helvetica or an embedded TrueType face.
#[derive(Debug, Clone, Default)]
pub enum HeaderFont {
    #[default]
    Helvetica,
    TrueType(TrueTypeFont),
}

impl HeaderFont {
    /// Helvetica, or the TrueType face at `path` when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::TrueType(TrueTypeFont::from_file(path)?)),
            None => Ok(Self::Helvetica),
        }
    }

    /// Whether every character of `text` can be drawn.
    pub fn covers(&self, text: &str) -> bool {
        match self {
            Self::Helvetica => text.chars().all(|c| win_ansi_byte(c).is_some()),
            Self::TrueType(font) => font.face().is_ok_and(|face| text.chars().all(|c| face.glyph_index(c).is_some())),
        }
    }

    /// Width of `text` in points at `font_size`.
    pub fn text_width(&self, text: &str, font_size: f32) -> f32 {
        match self {
            Self::Helvetica => {
                let units: u32 = text
                    .chars()
                    .map(|c| u32::from(helvetica_width(win_ansi_byte(c).unwrap_or(b'?'))))
                    .sum();
                #[allow(clippy::cast_precision_loss)]
                let units = units as f32;
                units * font_size / 1000.0
            }
            Self::TrueType(font) => font.text_width(text, font_size),
        }
    }

    /// The operand for a `Tj` operator drawing `text`.
    pub fn show_operand(&self, text: &str) -> String {
        match self {
            Self::Helvetica => {
                let bytes: Vec<u8> = text.chars().map(|c| win_ansi_byte(c).unwrap_or(b'?')).collect();
                literal_string(&bytes)
            }
            Self::TrueType(font) => format!("<{}>", font.hex_glyphs(text)),
        }
    }

    /// Add the font objects to `doc`, sized for drawing `text`. Returns the font dictionary id.
    pub fn add_to_document(&self, doc: &mut Document, text: &str) -> Result<ObjectId> {
        match self {
            Self::Helvetica => Ok(doc.add_object(Dictionary::from_iter([
                ("Type", Object::Name(b"Font".to_vec())),
                ("Subtype", Object::Name(b"Type1".to_vec())),
                ("BaseFont", Object::Name(b"Helvetica".to_vec())),
                ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
            ]))),
            Self::TrueType(font) => font.embed(doc, text),
        }
    }
}

/// WinAnsi code for `c`, for the printable ASCII and Latin-1 ranges.
fn win_ansi_byte(c: char) -> Option<u8> {
    match u32::from(c) {
        code @ (0x20..=0x7E | 0xA0..=0xFF) => u8::try_from(code).ok(),
        _ => None,
    }
}

fn helvetica_width(byte: u8) -> u16 {
    match byte {
        0x20..=0x7E => HELVETICA_WIDTHS[usize::from(byte - 0x20)],
        _ => HELVETICA_DEFAULT_WIDTH,
    }
}

/// PDF literal string with the delimiters escaped and high bytes in octal.
fn literal_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push('\\');
                out.push(char::from(b));
            }
            0x20..=0x7E => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out.push(')');
    out
}

/// A TrueType face loaded from disk.
#[derive(Clone)]
pub struct TrueTypeFont {
    data: Vec<u8>,
    base_name: String,
}

impl std::fmt::Debug for TrueTypeFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrueTypeFont")
            .field("base_name", &self.base_name)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl TrueTypeFont {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let base_name = crate::util::file_stem(path)
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>();
        Self::from_bytes(data, if base_name.is_empty() { "HeaderFont".to_string() } else { base_name })
    }

    pub fn from_bytes(data: Vec<u8>, base_name: String) -> Result<Self> {
        Face::parse(&data, 0).map_err(|e| Error::ConfigInvalid {
            field: "header.font_path".to_string(),
            reason: format!("not a usable TrueType font: {e}"),
        })?;
        Ok(Self { data, base_name })
    }

    fn face(&self) -> Result<Face<'_>> {
        Face::parse(&self.data, 0).map_err(|e| Error::Lopdf(format!("Failed to parse font: {e}")))
    }

    /// Glyph ids for `text`, with `.notdef` for characters the face lacks.
    fn glyph_ids(&self, text: &str) -> Vec<(char, u16)> {
        let Ok(face) = self.face() else {
            return Vec::new();
        };
        text.chars()
            .map(|c| (c, face.glyph_index(c).map_or(0, |g| g.0)))
            .collect()
    }

    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let Ok(face) = self.face() else {
            return 0.0;
        };
        let units_per_em = f32::from(face.units_per_em());
        let total: u32 = self
            .glyph_ids(text)
            .iter()
            .map(|&(_, gid)| u32::from(face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0)))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let total = total as f32;
        total * font_size / units_per_em
    }

    fn hex_glyphs(&self, text: &str) -> String {
        self.glyph_ids(text).iter().fold(String::new(), |mut acc, &(_, gid)| {
            let _ = write!(acc, "{gid:04X}");
            acc
        })
    }

    fn embed(&self, doc: &mut Document, text: &str) -> Result<ObjectId> {
        let face = self.face()?;
        let units_per_em = i64::from(face.units_per_em());
        let scale = |w: u16| i64::from(w) * 1000 / units_per_em;

        let used: BTreeMap<u16, char> = self
            .glyph_ids(text)
            .into_iter()
            .filter(|&(_, gid)| gid != 0)
            .map(|(c, gid)| (gid, c))
            .collect();

        #[allow(clippy::cast_possible_wrap)]
        let font_file = Stream::new(
            Dictionary::from_iter([("Length1", Object::Integer(self.data.len() as i64))]),
            self.data.clone(),
        )
        .with_compression(true);
        let font_file_id = doc.add_object(font_file);

        let bbox = face.global_bounding_box();
        let name = Object::Name(self.base_name.as_bytes().to_vec());
        let descriptor_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"FontDescriptor".to_vec())),
            ("FontName", name.clone()),
            ("Flags", Object::Integer(32)),
            (
                "FontBBox",
                Object::Array(vec![
                    Object::Integer(i64::from(bbox.x_min)),
                    Object::Integer(i64::from(bbox.y_min)),
                    Object::Integer(i64::from(bbox.x_max)),
                    Object::Integer(i64::from(bbox.y_max)),
                ]),
            ),
            ("ItalicAngle", Object::Integer(0)),
            ("Ascent", Object::Integer(i64::from(face.ascender()))),
            ("Descent", Object::Integer(i64::from(face.descender()))),
            (
                "CapHeight",
                Object::Integer(i64::from(face.capital_height().unwrap_or_else(|| face.ascender()))),
            ),
            ("StemV", Object::Integer(80)),
            ("FontFile2", Object::Reference(font_file_id)),
        ]));

        // [gid [w]] per used glyph
        let widths: Vec<Object> = used
            .keys()
            .flat_map(|&gid| {
                let w = scale(face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0));
                [Object::Integer(i64::from(gid)), Object::Array(vec![Object::Integer(w)])]
            })
            .collect();
        let default_width = face
            .glyph_index(' ')
            .and_then(|g| face.glyph_hor_advance(g))
            .map_or(500, scale);

        let cid_font_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"CIDFontType2".to_vec())),
            ("BaseFont", name.clone()),
            (
                "CIDSystemInfo",
                Object::Dictionary(Dictionary::from_iter([
                    ("Registry", Object::String(b"Adobe".to_vec(), StringFormat::Literal)),
                    ("Ordering", Object::String(b"Identity".to_vec(), StringFormat::Literal)),
                    ("Supplement", Object::Integer(0)),
                ])),
            ),
            ("FontDescriptor", Object::Reference(descriptor_id)),
            ("DW", Object::Integer(default_width)),
            ("W", Object::Array(widths)),
            ("CIDToGIDMap", Object::Name(b"Identity".to_vec())),
        ]));

        let to_unicode_id = doc.add_object(Stream::new(Dictionary::new(), to_unicode_cmap(&used).into_bytes()));

        Ok(doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type0".to_vec())),
            ("BaseFont", name),
            ("Encoding", Object::Name(b"Identity-H".to_vec())),
            ("DescendantFonts", Object::Array(vec![Object::Reference(cid_font_id)])),
            ("ToUnicode", Object::Reference(to_unicode_id)),
        ])))
    }
}

/// A ToUnicode CMap mapping each used glyph back to its character.
fn to_unicode_cmap(used: &BTreeMap<u16, char>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );

    let entries: Vec<_> = used.iter().collect();
    // At most 100 entries per bfchar block
    for chunk in entries.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (gid, c) in chunk {
            let mut units = [0u16; 2];
            let hex: String = c.encode_utf16(&mut units).iter().map(|u| format!("{u:04X}")).collect();
            let _ = writeln!(cmap, "<{gid:04X}> <{hex}>");
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}
