mod font;
mod header;
mod merge;
pub(crate) mod page;

pub use font::{HeaderFont, TrueTypeFont};
pub use header::{HeaderOptions, HeaderStamper, stamp_header_file};
pub use merge::{BookmarkEntry, MergeSource, MergedPdf, merge_documents, merge_pdfs, outline_entries, text_string};

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use lopdf::Document;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::util::persist_unique;

/// Serialize `doc` into an anonymous temporary file in `dir`.
fn stage(doc: &mut Document, dir: &Path, label: &Path) -> Result<NamedTempFile> {
    std::fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(staged.as_file_mut());
        doc.save_to(&mut writer)
            .map_err(|e| Error::PdfSave(format!("Failed to write {}: {e}", label.display())))?;
        writer.flush()?;
    }
    Ok(staged)
}

/// Write `doc` to `output` through a temporary file in the same directory, so
/// `output` either keeps its old content or holds the complete new document.
pub(crate) fn save_atomically(doc: &mut Document, output: &Path) -> Result<()> {
    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staged = stage(doc, dir, output)?;
    staged.persist(output).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Write `doc` under a name in `dir` that no other file holds yet, starting
/// from `{stem}.pdf`. Returns the claimed path.
pub(crate) fn save_new(doc: &mut Document, dir: &Path, stem: &str) -> Result<PathBuf> {
    let staged = stage(doc, dir, &dir.join(format!("{stem}.pdf")))?;
    persist_unique(staged.into_temp_path(), dir, stem)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fixtures {
    use std::path::Path;

    use lopdf::content::{Content, Operation};
    use lopdf::{Dictionary, Document, Object, Stream};

    /// A document with one page per `(width, height)`, each showing its number.
    pub fn sample_document(sizes: &[(i64, i64)]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));
        let resources_id = doc.add_object(Dictionary::from_iter([(
            "Font",
            Object::Dictionary(Dictionary::from_iter([("F1", Object::Reference(font_id))])),
        )]));

        let kids: Vec<Object> = sizes
            .iter()
            .enumerate()
            .map(|(i, &(width, height))| {
                let content = Content {
                    operations: vec![
                        Operation::new("BT", vec![]),
                        Operation::new("Tf", vec!["F1".into(), 24.into()]),
                        Operation::new("Td", vec![20.into(), 20.into()]),
                        Operation::new("Tj", vec![Object::string_literal(format!("Page {}", i + 1))]),
                        Operation::new("ET", vec![]),
                    ],
                };
                let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
                let page_id = doc.add_object(Dictionary::from_iter([
                    ("Type", Object::Name(b"Page".to_vec())),
                    ("Parent", Object::Reference(pages_id)),
                    ("Contents", Object::Reference(content_id)),
                    ("Resources", Object::Reference(resources_id)),
                    ("MediaBox", Object::Array(vec![0.into(), 0.into(), width.into(), height.into()])),
                ]));
                Object::Reference(page_id)
            })
            .collect();

        let count = i64::try_from(kids.len()).unwrap();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter([
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(kids)),
                ("Count", Object::Integer(count)),
            ])),
        );
        let catalog_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc
    }

    pub fn write_sample_pdf(path: &Path, sizes: &[(i64, i64)]) {
        sample_document(sizes).save(path).unwrap();
    }

    /// A one-page document whose page inherits its MediaBox from the page tree.
    pub fn inherited_media_box_document(width: i64, height: i64) -> Document {
        let mut doc = sample_document(&[(width, height)]);
        let page_id = *doc.get_pages().get(&1).unwrap();
        let pages_id = doc.get_dictionary(page_id).unwrap().get(b"Parent").unwrap().as_reference().unwrap();

        doc.get_dictionary_mut(page_id).unwrap().remove(b"MediaBox");
        doc.get_dictionary_mut(pages_id)
            .unwrap()
            .set("MediaBox", Object::Array(vec![0.into(), 0.into(), width.into(), height.into()]));
        doc
    }
}
