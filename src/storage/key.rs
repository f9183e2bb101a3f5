//! Storage keys
//!
//! A [`StorageKey`] is `folder/name`. The folder is normalized once when the
//! key is built; the name is expected to come out of
//! [`crate::upload::filename::normalize`].

use crate::upload::filename::{
    sanitize_component, split_extension, truncate_at_boundary, MAX_NAME_BYTES,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

/// Characters escaped inside one URL path segment. Non-ASCII bytes are always
/// escaped by `utf8_percent_encode`, so Unicode names round-trip through URLs.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Longest key accepted by the object stores behind the backends
pub const MAX_KEY_BYTES: usize = 1024;

/// Longest normalized folder that still leaves room for `/` and a
/// full-length name
pub const MAX_FOLDER_BYTES: usize = MAX_KEY_BYTES - MAX_NAME_BYTES - 1;

/// Object key inside a backend namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    folder: String,
    name: String,
    full: String,
}

impl StorageKey {
    /// Build a key from a raw folder value and an already-normalized name
    pub fn new(folder: &str, name: impl Into<String>) -> Self {
        Self::from_parts(normalize_folder(folder), name.into())
    }

    fn from_parts(folder: String, name: String) -> Self {
        let full = if folder.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", folder, name)
        };
        Self { folder, name, full }
    }

    /// Folder part (may be empty)
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// File name part
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full key, `folder/name`
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Same folder, name disambiguated as `stem-N.ext`. The stem is cut
    /// so the name stays within [`MAX_NAME_BYTES`].
    pub fn with_suffix(&self, n: usize) -> Self {
        let suffix = format!("-{}", n);
        let name = match split_extension(&self.name) {
            Some((stem, ext)) => {
                let budget = MAX_NAME_BYTES.saturating_sub(suffix.len() + ext.len() + 1);
                format!("{}{}.{}", truncate_at_boundary(stem, budget), suffix, ext)
            }
            None => {
                let budget = MAX_NAME_BYTES.saturating_sub(suffix.len());
                format!("{}{}", truncate_at_boundary(&self.name, budget), suffix)
            }
        };
        Self::from_parts(self.folder.clone(), name)
    }

    /// Key as a URL path, each segment percent-encoded
    pub fn url_path(&self) -> String {
        self.full
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Normalize a destination folder: every segment gets the filename character
/// policy, and empty, `.` and `..` segments are dropped.
pub fn normalize_folder(folder: &str) -> String {
    folder
        .split(['/', '\\'])
        .map(sanitize_component)
        .filter(|segment| !segment.is_empty() && segment != "." && segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a base URL and a key
pub(crate) fn join_url(base: &str, key: &StorageKey) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.url_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_with_folder() {
        let key = StorageKey::new("albums/2024", "cover.jpg");
        assert_eq!(key.as_str(), "albums/2024/cover.jpg");
        assert_eq!(key.folder(), "albums/2024");
        assert_eq!(key.name(), "cover.jpg");
    }

    #[test]
    fn test_key_without_folder() {
        let key = StorageKey::new("", "cover.jpg");
        assert_eq!(key.as_str(), "cover.jpg");
    }

    #[test]
    fn test_folder_traversal_removed() {
        assert_eq!(normalize_folder("../../etc//passwd/."), "etc/passwd");
        assert_eq!(normalize_folder("/profiles\\avatars/"), "profiles/avatars");
        assert_eq!(normalize_folder("a\u{0}b/ c  d "), "ab/c d");
    }

    #[test]
    fn test_with_suffix() {
        let key = StorageKey::new("uploads", "photo.jpg");
        assert_eq!(key.with_suffix(1).as_str(), "uploads/photo-1.jpg");
        assert_eq!(key.with_suffix(12).name(), "photo-12.jpg");

        let key = StorageKey::new("uploads", "README");
        assert_eq!(key.with_suffix(2).as_str(), "uploads/README-2");
    }

    #[test]
    fn test_with_suffix_stays_within_name_limit() {
        let name = crate::upload::filename::normalize(&format!("{}.jpg", "a".repeat(400)), true);
        assert_eq!(name.len(), MAX_NAME_BYTES);

        let key = StorageKey::new("albums", name);
        let suffixed = key.with_suffix(1);
        assert!(suffixed.name().len() <= MAX_NAME_BYTES);
        assert!(suffixed.name().ends_with("-1.jpg"));
        assert_ne!(suffixed, key);

        let wide = StorageKey::new("albums", format!("{}.png", "é".repeat(126)));
        let suffixed = wide.with_suffix(123);
        assert!(suffixed.name().len() <= MAX_NAME_BYTES);
        assert!(suffixed.name().ends_with("é-123.png"));
    }

    #[test]
    fn test_longest_folder_fits_key_limit() {
        let folder = "f".repeat(MAX_FOLDER_BYTES);
        let name = "n".repeat(MAX_NAME_BYTES - 4) + ".jpg";
        let key = StorageKey::new(&folder, name).with_suffix(99);
        assert!(key.as_str().len() <= MAX_KEY_BYTES);
    }

    #[test]
    fn test_url_path_encodes_segments() {
        let key = StorageKey::new("gallery", "my photo#1.jpg");
        assert_eq!(key.url_path(), "gallery/my%20photo%231.jpg");

        let key = StorageKey::new("gallery", "صورة.jpg");
        let encoded = key.url_path();
        assert!(encoded.starts_with("gallery/%D8%B5"));
        let decoded = percent_encoding::percent_decode_str(&encoded)
            .decode_utf8()
            .unwrap();
        assert_eq!(decoded, "gallery/صورة.jpg");
    }

    #[test]
    fn test_join_url_trims_slash() {
        let key = StorageKey::new("a", "b.png");
        assert_eq!(join_url("https://cdn.example.com/", &key), "https://cdn.example.com/a/b.png");
    }
}
