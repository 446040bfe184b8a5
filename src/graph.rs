//! The build result handed back to the caller.
//!
//! A [`Graph`] is an immutable value: the engine discards all of its
//! intermediate state on return, and nothing is cached across builds. The
//! valid-node map is the product consumed by the assembler; the unpruned map
//! exists for diagnostics only.

use std::collections::BTreeMap;
use std::fmt::Write;

use console::style;

use crate::error::Reason;
use crate::key::Key;
use crate::node::Node;

/// The resolved dependency graph for one set of seeds.
pub struct Graph {
    /// Pruned map holding only nodes that are neither failed nor incomplete,
    /// each reachable from a seed through valid nodes only.
    valid: BTreeMap<Key, Node>,
    /// Keys whose own calculation failed, with the reason.
    errors: BTreeMap<Key, Reason>,
    /// Every node the traversal touched, error and incomplete nodes included.
    all: BTreeMap<Key, Node>,
    /// The keys the build was asked for.
    seeds: Vec<Key>,
}

impl Graph {
    pub(crate) fn new(
        valid: BTreeMap<Key, Node>,
        errors: BTreeMap<Key, Reason>,
        all: BTreeMap<Key, Node>,
        seeds: Vec<Key>,
    ) -> Self {
        Self {
            valid,
            errors,
            all,
            seeds,
        }
    }

    /// Whether `key` survived pruning.
    pub fn contains(&self, key: &Key) -> bool {
        self.valid.contains_key(key)
    }

    pub fn get(&self, key: &Key) -> Option<&Node> {
        self.valid.get(key)
    }

    /// Valid nodes in key order, for deterministic output.
    pub fn nodes(&self) -> impl Iterator<Item = (&Key, &Node)> {
        self.valid.iter()
    }

    /// Error origins in key order.
    pub fn errors(&self) -> impl Iterator<Item = (&Key, &Reason)> {
        self.errors.iter()
    }

    /// The unpruned map, for diagnostics. Survivors, incomplete nodes and
    /// error origins alike.
    pub fn all_nodes(&self) -> impl Iterator<Item = (&Key, &Node)> {
        self.all.iter()
    }

    pub fn seeds(&self) -> &[Key] {
        &self.seeds
    }

    /// One line: how many artifacts failed, plus the smallest failing key and
    /// its reason. `None` when everything generated.
    pub fn error_summary(&self) -> Option<String> {
        let (key, reason) = self.errors.first_key_value()?;
        let count = self.errors.len();

        Some(match count {
            1 => format!("1 artifact failed, first: {key}: {reason}"),
            n => format!("{n} artifacts failed, first: {key}: {reason}"),
        })
    }

    /// The full failure report, one sorted line per failing key, suitable for
    /// direct user display. `None` when everything generated.
    pub fn error_report(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }

        let mut acc = match self.errors.len() {
            1 => String::from("1 conversion artifact could not be generated:\n"),
            n => format!("{n} conversion artifacts could not be generated:\n"),
        };
        for (key, reason) in &self.errors {
            writeln!(acc, "  {key}: {reason}").unwrap();
        }

        Some(acc)
    }

    /// Prints the failure report to stderr, if there is anything to report.
    pub fn print_errors(&self) {
        let Some(summary) = self.error_summary() else {
            return;
        };

        eprintln!("{}", style(summary).red());
        if let Some(report) = self.error_report() {
            eprint!("{report}");
        }
    }
}
