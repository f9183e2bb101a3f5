//! Upload request classification
//!
//! Maps the named file fields of a request onto one of the supported shapes.
//! Purely structural: field names and file counts are inspected, content is
//! not, and no storage call is made.

use super::{FileField, IncomingFile, UploadError};

/// Field carrying exactly one file
pub const FIELD_FILE: &str = "file";
/// Field carrying any number of files treated alike
pub const FIELD_FILES: &str = "files";
/// Designated cover image of a mixed upload
pub const FIELD_COVER_IMAGE: &str = "coverImage";
/// Gallery images of a mixed upload
pub const FIELD_IMAGES: &str = "images";

/// Structural pattern of an upload request
#[derive(Debug)]
pub enum UploadShape {
    /// `file`
    Single(IncomingFile),
    /// `files[]`
    Homogeneous(Vec<IncomingFile>),
    /// `coverImage` and/or `images[]`
    Mixed {
        cover_image: Option<IncomingFile>,
        images: Vec<IncomingFile>,
    },
}

impl UploadShape {
    /// Shape label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            UploadShape::Single(_) => "single",
            UploadShape::Homogeneous(_) => "homogeneous",
            UploadShape::Mixed { .. } => "mixed",
        }
    }

    pub fn file_count(&self) -> usize {
        match self {
            UploadShape::Single(_) => 1,
            UploadShape::Homogeneous(files) => files.len(),
            UploadShape::Mixed {
                cover_image,
                images,
            } => usize::from(cover_image.is_some()) + images.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Single,
    Homogeneous,
    Mixed,
}

/// Field name with a trailing `[]` removed
pub fn canonical_field_name(name: &str) -> &str {
    name.strip_suffix("[]").unwrap_or(name)
}

fn family_of(name: &str) -> Option<Family> {
    match canonical_field_name(name) {
        FIELD_FILE => Some(Family::Single),
        FIELD_FILES => Some(Family::Homogeneous),
        FIELD_COVER_IMAGE | FIELD_IMAGES => Some(Family::Mixed),
        _ => None,
    }
}

/// Classify the file fields of a request.
///
/// Fails with [`UploadError::UnsupportedShape`] for unknown field names,
/// fields of different shapes in one request, or a single-file field that
/// carries more than one file. Fails with [`UploadError::EmptyUpload`] when
/// no file is attached at all.
pub fn classify(fields: Vec<FileField>) -> Result<UploadShape, UploadError> {
    let mut family: Option<(Family, String)> = None;

    for field in &fields {
        let this = family_of(&field.name).ok_or_else(|| {
            UploadError::UnsupportedShape(format!("unrecognized field '{}'", field.name))
        })?;

        match &family {
            None => family = Some((this, field.name.clone())),
            Some((existing, first)) if *existing != this => {
                return Err(UploadError::UnsupportedShape(format!(
                    "field '{}' cannot be combined with '{}'",
                    field.name, first
                )));
            }
            Some(_) => {}
        }
    }

    let total: usize = fields.iter().map(|f| f.files.len()).sum();
    let Some((family, _)) = family else {
        return Err(UploadError::EmptyUpload);
    };
    if total == 0 {
        return Err(UploadError::EmptyUpload);
    }

    match family {
        Family::Single => {
            let mut files = take_files(fields);
            if files.len() != 1 {
                return Err(UploadError::UnsupportedShape(format!(
                    "field '{}' accepts exactly one file, got {}",
                    FIELD_FILE,
                    files.len()
                )));
            }
            files
                .pop()
                .map(UploadShape::Single)
                .ok_or(UploadError::EmptyUpload)
        }
        Family::Homogeneous => Ok(UploadShape::Homogeneous(take_files(fields))),
        Family::Mixed => {
            let (covers, galleries): (Vec<FileField>, Vec<FileField>) = fields
                .into_iter()
                .partition(|f| canonical_field_name(&f.name) == FIELD_COVER_IMAGE);

            let mut covers = take_files(covers);
            if covers.len() > 1 {
                return Err(UploadError::UnsupportedShape(format!(
                    "field '{}' accepts at most one file, got {}",
                    FIELD_COVER_IMAGE,
                    covers.len()
                )));
            }

            Ok(UploadShape::Mixed {
                cover_image: covers.pop(),
                images: take_files(galleries),
            })
        }
    }
}

fn take_files(fields: Vec<FileField>) -> Vec<IncomingFile> {
    fields.into_iter().flat_map(|f| f.files).collect()
}
