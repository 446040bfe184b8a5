//! Assembling a pruned [`Graph`] into output files.
//!
//! The engine guarantees key-ordered iteration, so concatenation here is
//! deterministic: two builds of the same seeds produce byte-identical
//! bundles. Writes are content-guarded; an unchanged file is left alone so
//! downstream build tooling sees no spurious modification.

use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::OutputError;
use crate::graph::Graph;
use crate::key::Direction;

/// Deduplicated, sorted set of external resource paths the generated code
/// needs imported in its output file.
#[derive(Debug, Clone, Default)]
pub struct ImportSet {
    paths: BTreeSet<Utf8PathBuf>,
}

impl ImportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource path. Duplicates collapse silently.
    pub fn register(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.paths.insert(path.into());
        self
    }

    /// Merges another import set into this one.
    pub fn merge(&mut self, other: ImportSet) {
        self.paths.extend(other.paths);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utf8Path> {
        self.paths.iter().map(Utf8PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Serialize the set to a JSON manifest.
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Manifest<'a> {
            imports: Vec<&'a str>,
        }

        serde_json::to_string(&Manifest {
            imports: self.paths.iter().map(|p| p.as_str()).collect(),
        })
    }
}

/// The concatenated output of one [`Graph`], one code section per direction
/// plus the merged import manifest.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub to_script: String,
    pub from_script: String,
    pub imports: ImportSet,
}

impl Bundle {
    /// Walks the valid nodes in key order, concatenating their code and
    /// collecting their imports.
    pub fn assemble(graph: &Graph) -> Self {
        let mut to_script = String::new();
        let mut from_script = String::new();
        let mut imports = ImportSet::new();

        for (key, node) in graph.nodes() {
            match key.direction() {
                Direction::ToScript => to_script.push_str(node.code()),
                Direction::FromScript => from_script.push_str(node.code()),
            }

            for path in node.imports() {
                imports.register(path.clone());
            }
        }

        Self {
            to_script,
            from_script,
            imports,
        }
    }

    /// Writes `to_script.<ext>`, `from_script.<ext>` and `imports.json` under
    /// `dir`, returning the paths actually written. A file whose content hash
    /// is unchanged is skipped.
    pub fn write_to(&self, dir: &Utf8Path, ext: &str) -> Result<Vec<Utf8PathBuf>, OutputError> {
        fs::create_dir_all(dir)?;

        let manifest = self.imports.to_json()?;
        let files = [
            (dir.join("to_script").with_extension(ext), self.to_script.as_str()),
            (dir.join("from_script").with_extension(ext), self.from_script.as_str()),
            (dir.join("imports.json"), manifest.as_str()),
        ];

        let mut written = Vec::new();
        for (path, data) in files {
            if is_unchanged(&path, data.as_bytes()) {
                tracing::debug!("skipped {path}, content unchanged");
                continue;
            }

            fs::write(&path, data)?;
            tracing::debug!("wrote {path}");
            written.push(path);
        }

        Ok(written)
    }
}

fn is_unchanged(path: &Utf8Path, data: &[u8]) -> bool {
    match fs::read(path) {
        Ok(existing) => blake3::hash(&existing) == blake3::hash(data),
        Err(_) => false,
    }
}
