//! Resolving what a run starts from: inline text or a source file such as a
//! diagram image that the parser backend opens itself.

use std::path::{Path, PathBuf};

use blueprint_types::Result;

/// Extensions always handed to the parser by path.
pub const IMAGE_EXTENSIONS: [&str; 8] = [
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Text content used directly as the initial input.
    Text(String),
    /// A file the parser must open; the initial input is its absolute path.
    File(PathBuf),
}

impl InputSource {
    /// The string the engine receives as its initial input.
    pub fn into_initial_input(self) -> String {
        match self {
            InputSource::Text(text) => text,
            InputSource::File(path) => path.display().to_string(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, InputSource::File(_))
    }
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Load the input at `path`.
///
/// Images and anything that is not UTF-8 text are passed by absolute path;
/// everything else is read as text.
pub fn load_input(path: &Path) -> Result<InputSource> {
    if has_image_extension(path) {
        return Ok(InputSource::File(std::fs::canonicalize(path)?));
    }
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(InputSource::Text(text)),
        Err(_) => {
            tracing::debug!(path = %path.display(), "Input is not UTF-8, passing it by path");
            Ok(InputSource::File(std::fs::canonicalize(path)?))
        }
    }
}

/// The file a payload refers to, when the payload is nothing but the path of
/// an existing file.
pub fn referenced_file(payload: &str) -> Option<PathBuf> {
    let candidate = payload.trim();
    if candidate.is_empty() || candidate.contains('\n') {
        return None;
    }
    let path = Path::new(candidate);
    path.is_file().then(|| path.to_path_buf())
}
