//! Multi-file artifact bundles emitted by the generator.
//!
//! A generator reply carries one `<file path="...">...</file>` block per file.
//! The bundle keeps files in first-seen order; a repeated path keeps its
//! original position but takes the later content.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use blueprint_types::{BlueprintError, Result};

/// File name used when a reply carries no file blocks.
pub const FALLBACK_FILE: &str = "main.tf";

static FILE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<file path="(?P<path>[^"]+)">\s*(?P<content>.*?)\s*</file>"#)
        .expect("valid regex")
});

static FENCE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```[a-z]*\n").expect("valid regex"));

static FENCE_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\n```$").expect("valid regex"));

static RESOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*resource\s+"([^"]+)"\s+"([^"]+)""#).expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    pub content: String,
}

/// A resource address declared in more than one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateResource {
    /// `type.name`, e.g. `aws_vpc.main`.
    pub address: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    files: Vec<ArtifactFile>,
}

fn strip_fences(content: &str) -> String {
    let opened = FENCE_OPEN_RE.replace_all(content, "");
    FENCE_CLOSE_RE.replace_all(&opened, "").trim().to_string()
}

impl ArtifactBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing the content of an existing file with the same path.
    /// Files whose content is blank are ignored.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        let content = content.into();
        if content.trim().is_empty() {
            tracing::debug!(path = %path, "Dropping empty artifact file");
            return;
        }
        match self.files.iter_mut().find(|f| f.path == path) {
            Some(existing) => existing.content = content,
            None => self.files.push(ArtifactFile { path, content }),
        }
    }

    pub fn files(&self) -> &[ArtifactFile] {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content.as_str())
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Render back into `<file>` blocks. Parsing the result yields the same bundle.
    pub fn render(&self) -> String {
        self.files
            .iter()
            .map(|f| format!("<file path=\"{}\">\n{}\n</file>\n", f.path, f.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resource addresses declared more than once, across or within files.
    pub fn duplicate_resources(&self) -> Vec<DuplicateResource> {
        let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in &self.files {
            for caps in RESOURCE_RE.captures_iter(&file.content) {
                let address = format!("{}.{}", &caps[1], &caps[2]);
                seen.entry(address).or_default().push(file.path.clone());
            }
        }
        seen.into_iter()
            .filter(|(_, files)| files.len() > 1)
            .map(|(address, files)| DuplicateResource { address, files })
            .collect()
    }

    /// Write every file under `dir`, creating directories as needed.
    ///
    /// Paths must be relative and stay inside `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let relative = Path::new(&file.path);
            let escapes = relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(BlueprintError::InvalidInput(format!(
                    "artifact path '{}' must be relative and stay inside the output directory",
                    file.path
                )));
            }
            let target = dir.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, format!("{}\n", file.content))?;
            written.push(target);
        }
        tracing::info!(dir = %dir.display(), files = written.len(), "Wrote artifact files");
        Ok(written)
    }
}

/// Parse a generator reply into a bundle.
///
/// Falls back to a single `main.tf` holding the whole reply when no file
/// blocks are present. An empty reply yields an empty bundle.
pub fn parse_artifact(reply: &str) -> ArtifactBundle {
    let mut bundle = ArtifactBundle::new();
    for caps in FILE_BLOCK_RE.captures_iter(reply) {
        let path = caps["path"].trim();
        if path.is_empty() {
            continue;
        }
        bundle.insert(path, strip_fences(&caps["content"]));
    }

    if bundle.is_empty() && !FILE_BLOCK_RE.is_match(reply) {
        let whole = strip_fences(reply.trim());
        if !whole.is_empty() {
            tracing::warn!("No <file> blocks in generator reply, treating it as {}", FALLBACK_FILE);
            bundle.insert(FALLBACK_FILE, whole);
        }
    }
    bundle
}
