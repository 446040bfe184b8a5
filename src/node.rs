use camino::Utf8PathBuf;

use crate::error::Reason;
use crate::key::Request;

/// The computed outcome for one [`Key`](crate::Key).
///
/// A node is created exactly once per key, when the calculator returns for it.
/// Its code and dependencies never change afterwards; the only field with a
/// second life is `incomplete`, which failure propagation may set at most once
/// after creation.
#[derive(Debug, Clone)]
pub struct Node {
    code: String,
    deps: Vec<Request>,
    imports: Vec<Utf8PathBuf>,
    error: Option<Reason>,
    pub(crate) incomplete: bool,
    labels: Vec<String>,
}

impl Node {
    /// A successfully calculated node. Self-edges are the caller's problem and
    /// must already be stripped from `deps`.
    pub(crate) fn computed(code: String, deps: Vec<Request>, imports: Vec<Utf8PathBuf>) -> Self {
        Self {
            code,
            deps,
            imports,
            error: None,
            incomplete: false,
            labels: Vec::new(),
        }
    }

    /// A node whose own calculation failed. It carries no code; the
    /// propagation step marks it incomplete together with its dependents.
    pub(crate) fn failed(reason: Reason) -> Self {
        Self {
            code: String::new(),
            deps: Vec::new(),
            imports: Vec::new(),
            error: Some(reason),
            incomplete: false,
            labels: Vec::new(),
        }
    }

    /// Generated conversion code, opaque to the engine.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The requests this artifact depends on, self-references removed.
    pub fn deps(&self) -> &[Request] {
        &self.deps
    }

    /// External resource paths this artifact needs in its output file.
    pub fn imports(&self) -> &[Utf8PathBuf] {
        &self.imports
    }

    /// The failure reason, when this node is an error origin.
    pub fn failure(&self) -> Option<&Reason> {
        self.error.as_ref()
    }

    /// Whether this node, or anything it transitively depends on, failed.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// Debug labels merged from every request that hit this key.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Accumulate labels in first-seen order, dropping duplicates.
    pub(crate) fn merge_labels(&mut self, labels: impl IntoIterator<Item = String>) {
        for label in labels {
            if !self.labels.contains(&label) {
                self.labels.push(label);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_merge_labels() {
        let mut node = Node::computed(String::new(), vec![], vec![]);
        node.merge_labels(["a".to_string(), "b".to_string()]);
        node.merge_labels(["b".to_string(), "c".to_string(), "a".to_string()]);
        assert_eq!(node.labels(), ["a", "b", "c"]);
    }

    #[test]
    fn test_failed_carries_reason() {
        let node = Node::failed(Reason::new(anyhow::anyhow!("unsupported")));
        assert!(node.failure().is_some());
        assert!(node.code().is_empty());
        assert!(node.deps().is_empty());
    }
}
