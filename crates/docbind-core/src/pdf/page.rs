//! Page-level helpers shared by the merger and the header stamper.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{Error, Result};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guard against circular `Parent` chains in malformed files.
const MAX_TREE_DEPTH: usize = 32;

/// US Letter, used when no media box is found anywhere up the tree.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Look up `key` on the page or the nearest ancestor that defines it.
pub fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        let parent_id = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent_id).ok()?;
    }
    None
}

/// Copy inherited attributes onto the page itself so it no longer depends on
/// its original page tree.
pub fn materialize_inherited(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let missing: Vec<(&[u8], Object)> = {
        let page = doc.get_dictionary(page_id)?;
        INHERITABLE
            .iter()
            .filter(|key| !page.has(key))
            .filter_map(|&key| inherited_attribute(doc, page_id, key).map(|value| (key, value)))
            .collect()
    };

    if missing.is_empty() {
        return Ok(());
    }
    let page = doc.get_dictionary_mut(page_id)?;
    for (key, value) in missing {
        page.set(key, value);
    }
    Ok(())
}

/// A rectangle attribute of the page, normalized to `[x0, y0, x1, y1]`.
fn page_box(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<[f32; 4]> {
    let value = match inherited_attribute(doc, page_id, key)? {
        Object::Reference(id) => doc.get_object(id).ok()?.clone(),
        other => other,
    };
    let values: Vec<f32> = value.as_array().ok()?.iter().filter_map(|o| o.as_float().ok()).collect();
    match values.as_slice() {
        &[x0, y0, x1, y1] => Some([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]),
        _ => None,
    }
}

/// The page's media box as `[x0, y0, x1, y1]`.
pub fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    page_box(doc, page_id, b"MediaBox").unwrap_or(DEFAULT_MEDIA_BOX)
}

/// The region a viewer shows: the crop box clipped to the media box.
pub fn visible_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let media = media_box(doc, page_id);
    let Some(crop) = page_box(doc, page_id, b"CropBox") else {
        return media;
    };
    let clipped = [
        crop[0].max(media[0]),
        crop[1].max(media[1]),
        crop[2].min(media[2]),
        crop[3].min(media[3]),
    ];
    if clipped[0] < clipped[2] && clipped[1] < clipped[3] { clipped } else { media }
}

/// Clockwise display rotation in degrees: 0, 90, 180 or 270.
pub fn rotation(doc: &Document, page_id: ObjectId) -> i64 {
    let degrees = inherited_attribute(doc, page_id, b"Rotate")
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(0);
    let normalized = degrees.rem_euclid(360);
    if normalized % 90 == 0 { normalized } else { 0 }
}

/// The page's existing content streams, with an indirect array resolved.
fn content_refs(doc: &Document, page: &Dictionary) -> Vec<Object> {
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(arr)) => arr.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(arr)) => arr.clone(),
        _ => Vec::new(),
    }
}

/// Draw `content` on top of the page with a clean graphics state.
///
/// The existing content is bracketed by `q`/`Q` so any transformation it
/// leaves active does not leak into the overlay.
pub fn overlay_content(doc: &mut Document, page_id: ObjectId, content: &str) -> Result<()> {
    let existing = content_refs(doc, doc.get_dictionary(page_id)?);

    let mut contents = Vec::with_capacity(existing.len() + 2);
    if !existing.is_empty() {
        let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
    }

    let restore = if contents.is_empty() { "" } else { "Q\n" };
    let overlay = format!("{restore}{content}");
    let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay.into_bytes()).with_compression(true));
    contents.push(Object::Reference(overlay_id));

    let page = doc.get_dictionary_mut(page_id)?;
    page.set("Contents", Object::Array(contents));
    Ok(())
}

/// Add `font_id` to the page's font resources under `name`.
///
/// Resources may be inline, indirect or inherited; the result is always an
/// inline dictionary on the page.
pub fn add_font_resource(doc: &mut Document, page_id: ObjectId, name: &str, font_id: ObjectId) -> Result<()> {
    let mut resources = inherited_attribute(doc, page_id, b"Resources")
        .and_then(|obj| resolve_dict(doc, &obj))
        .unwrap_or_default();

    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|obj| resolve_dict(doc, obj))
        .unwrap_or_default();
    fonts.set(name, Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| Error::Lopdf(format!("Failed to get page: {e}")))?;
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d.clone()),
        Object::Reference(id) => doc.get_dictionary(*id).ok().cloned(),
        _ => None,
    }
}
