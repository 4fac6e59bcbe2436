//! Concatenating PDFs with a flat table of contents.
//!
//! Sources are appended in order. Each one is renumbered past the objects
//! already collected, its page tree is dropped and its pages are re-parented
//! under a single new `Pages` node, keeping their order. Attributes a page
//! inherited from its old tree are copied onto the page first.
//!
//! With bookmarks enabled every source with at least one page contributes a
//! level-1 entry pointing at its first page, so entry page numbers are
//! strictly increasing in source order.

use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use serde::Serialize;
use tracing::{debug, info};

use super::page::materialize_inherited;
use super::save_atomically;
use crate::error::{Error, Result};

/// One table-of-contents entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkEntry {
    /// Nesting level, 1 for top-level
    pub level: u32,
    pub title: String,
    /// 1-based page number in the merged output
    pub page_number: u32,
}

/// A PDF to append and the title of its bookmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSource {
    pub path: PathBuf,
    pub title: String,
}

impl MergeSource {
    /// Source titled with its file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = crate::util::file_stem(&path);
        Self { path, title }
    }

    pub fn titled(path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
        }
    }
}

/// A merged document before it is written.
pub struct MergedPdf {
    pub document: Document,
    pub bookmarks: Vec<BookmarkEntry>,
    pub page_count: u32,
}

/// Merge `sources` in memory.
///
/// Fails with [`Error::SourceMissing`] as soon as a source does not exist.
pub fn merge_documents(sources: &[MergeSource], add_bookmarks: bool) -> Result<MergedPdf> {
    if sources.is_empty() {
        return Err(Error::NoUsableSources);
    }

    let mut merged = Document::with_version("1.7");
    let mut next_id: u32 = 1;
    let mut kids: Vec<ObjectId> = Vec::new();
    let mut bookmarks = Vec::new();
    let mut offset: u32 = 0;

    for source in sources {
        if !source.path.is_file() {
            return Err(Error::SourceMissing(source.path.clone()));
        }
        let mut doc = Document::load(&source.path)
            .map_err(|e| Error::Lopdf(format!("Failed to load {}: {e}", source.path.display())))?;

        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for &page_id in &page_ids {
            materialize_inherited(&mut doc, page_id)?;
        }

        let page_count = u32::try_from(page_ids.len())
            .map_err(|_| Error::Lopdf(format!("{} has too many pages", source.path.display())))?;
        debug!("Appending {} ({} pages)", source.path.display(), page_count);

        if add_bookmarks && page_count > 0 {
            bookmarks.push(BookmarkEntry {
                level: 1,
                title: source.title.clone(),
                page_number: offset + 1,
            });
        }
        offset += page_count;

        for (object_id, object) in doc.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Outlines" | b"Outline" => {}
                _ => {
                    merged.objects.insert(object_id, object);
                }
            }
        }
        kids.extend(page_ids);
    }

    merged.max_id = merged.objects.keys().map(|id| id.0).max().unwrap_or(0).max(next_id);
    let pages_id = merged.new_object_id();

    for &page_id in &kids {
        if let Ok(page) = merged.get_dictionary_mut(page_id) {
            page.set("Parent", Object::Reference(pages_id));
        }
    }
    merged.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids.iter().map(|&id| Object::Reference(id)).collect())),
            ("Count", Object::Integer(i64::from(offset))),
        ])),
    );

    let mut catalog = Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]);
    if let Some(outlines_id) = write_outline(&mut merged, &kids, &bookmarks) {
        catalog.set("Outlines", Object::Reference(outlines_id));
        catalog.set("PageMode", Object::Name(b"UseOutlines".to_vec()));
    }
    let catalog_id = merged.add_object(catalog);
    merged.trailer.set("Root", Object::Reference(catalog_id));

    merged.prune_objects();
    merged.compress();

    Ok(MergedPdf {
        document: merged,
        bookmarks,
        page_count: offset,
    })
}

/// Merge `sources` into `output`. Nothing is written unless every source merges.
pub fn merge_pdfs(sources: &[MergeSource], output: &Path, add_bookmarks: bool) -> Result<Vec<BookmarkEntry>> {
    let mut merged = merge_documents(sources, add_bookmarks)?;
    save_atomically(&mut merged.document, output)?;
    info!(
        "Merged {} sources into {} ({} pages)",
        sources.len(),
        output.display(),
        merged.page_count
    );
    Ok(merged.bookmarks)
}

/// Write `entries` as a flat outline. `page_ids` are the document's pages in order.
fn write_outline(doc: &mut Document, page_ids: &[ObjectId], entries: &[BookmarkEntry]) -> Option<ObjectId> {
    let targets: Vec<(&BookmarkEntry, ObjectId)> = entries
        .iter()
        .filter_map(|entry| {
            let index = usize::try_from(entry.page_number.checked_sub(1)?).ok()?;
            page_ids.get(index).map(|&page| (entry, page))
        })
        .collect();
    if targets.is_empty() {
        return None;
    }

    let outlines_id = doc.new_object_id();
    let item_ids: Vec<ObjectId> = targets.iter().map(|_| doc.new_object_id()).collect();

    for (i, (entry, page)) in targets.iter().enumerate() {
        let mut item = Dictionary::from_iter([
            ("Title", text_string(&entry.title)),
            ("Parent", Object::Reference(outlines_id)),
            (
                "Dest",
                Object::Array(vec![Object::Reference(*page), Object::Name(b"Fit".to_vec())]),
            ),
        ]);
        if i > 0 {
            item.set("Prev", Object::Reference(item_ids[i - 1]));
        }
        if let Some(&next) = item_ids.get(i + 1) {
            item.set("Next", Object::Reference(next));
        }
        doc.objects.insert(item_ids[i], Object::Dictionary(item));
    }

    let count = i64::try_from(item_ids.len()).unwrap_or(i64::MAX);
    doc.objects.insert(
        outlines_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Outlines".to_vec())),
            ("First", Object::Reference(item_ids[0])),
            ("Last", Object::Reference(item_ids[item_ids.len() - 1])),
            ("Count", Object::Integer(count)),
        ])),
    );
    Some(outlines_id)
}

/// PDF text string: literal for ASCII, UTF-16BE with a byte order mark otherwise.
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Read back the top-level outline of `doc`.
pub fn outline_entries(doc: &Document) -> Vec<BookmarkEntry> {
    let page_numbers: std::collections::HashMap<ObjectId, u32> =
        doc.get_pages().into_iter().map(|(number, id)| (id, number)).collect();

    let first = doc
        .catalog()
        .ok()
        .and_then(|catalog| catalog.get(b"Outlines").ok())
        .and_then(|o| o.as_reference().ok())
        .and_then(|id| doc.get_dictionary(id).ok())
        .and_then(|outlines| outlines.get(b"First").ok())
        .and_then(|o| o.as_reference().ok());

    let mut entries = Vec::new();
    let mut cursor = first;
    while let Some(item_id) = cursor {
        // Guard against Next cycles
        if entries.len() > page_numbers.len() + 1024 {
            break;
        }
        let Ok(item) = doc.get_dictionary(item_id) else {
            break;
        };
        let title = item
            .get(b"Title")
            .ok()
            .and_then(|t| t.as_str().ok())
            .map(decode_text_string)
            .unwrap_or_default();
        let page_number = item
            .get(b"Dest")
            .ok()
            .and_then(|d| d.as_array().ok())
            .and_then(|dest| dest.first())
            .and_then(|o| o.as_reference().ok())
            .and_then(|page| page_numbers.get(&page).copied())
            .unwrap_or(0);
        entries.push(BookmarkEntry {
            level: 1,
            title,
            page_number,
        });
        cursor = item.get(b"Next").ok().and_then(|o| o.as_reference().ok());
    }
    entries
}
