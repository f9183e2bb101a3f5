//! Filename normalization
//!
//! Turns an attacker-controlled client filename into a name that is safe to
//! use as the last segment of a storage key. When the original name is kept,
//! Unicode text passes through untouched (no transliteration, no Unicode
//! normalization); only separators, reserved characters and control
//! characters are removed.

/// Longest name, in bytes, that will be used as a key segment
pub const MAX_NAME_BYTES: usize = 255;

/// Longest extension (without the dot) that is carried over
const MAX_EXTENSION_CHARS: usize = 16;

/// Characters that are never allowed inside a name
const RESERVED: &[char] = &['/', '\\', '?', '#', '%', '"', '<', '>', '|'];

/// Derive the candidate name for an uploaded file.
///
/// With `preserve_original_name` the sanitized basename of `original` is
/// returned; otherwise a generated identifier carrying the original extension.
/// An original that sanitizes to nothing also falls back to a generated name.
pub fn normalize(original: &str, preserve_original_name: bool) -> String {
    let base = basename(original);
    let extension = split_extension(base).map(|(_, ext)| ext);

    if !preserve_original_name {
        return generated_name(extension);
    }

    let cleaned = sanitize_component(base);
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return generated_name(extension);
    }

    truncate_name(&cleaned, MAX_NAME_BYTES)
}

/// Strip reserved and control characters and collapse whitespace runs into a
/// single space. Everything else is kept as is.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch.is_control() || RESERVED.contains(&ch) {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }

    out
}

/// Split `name` into `(stem, extension)` when it has a usable extension:
/// non-empty stem, 1 to 16 ASCII alphanumerics after the last dot.
pub fn split_extension(name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_CHARS
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some((stem, ext))
}

/// Collision-resistant generated name: `{unix_millis}-{uuid}[.ext]`
pub fn generated_name(extension: Option<&str>) -> String {
    let id = format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    );
    match extension {
        Some(ext) => format!("{}.{}", id, ext),
        None => id,
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Cut `name` to at most `max_bytes`, on a char boundary, keeping the extension.
fn truncate_name(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    match split_extension(name) {
        Some((stem, ext)) => {
            let budget = max_bytes.saturating_sub(ext.len() + 1);
            let stem = truncate_at_boundary(stem, budget).trim_end();
            format!("{}.{}", stem, ext)
        }
        None => truncate_at_boundary(name, max_bytes).trim_end().to_string(),
    }
}

pub(crate) fn truncate_at_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
