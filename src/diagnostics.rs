//! Visual export of the unpruned dependency graph.
//!
//! Renders every node the traversal touched, failed and incomplete ones
//! included, so the output shows *why* an artifact is missing from the final
//! bundle, not just that it is. Two formats: Mermaid for quick embedding in
//! markdown, DOT for graphviz tooling. Nodes are colored by state:
//!
//! * **Green**: valid seed
//! * **Blue**: valid
//! * **Gold**: incomplete (a dependency failed somewhere below)
//! * **Red**: error origin (its own calculation failed)

use std::collections::BTreeMap;

use glob::Pattern;
use petgraph::dot::{Config, Dot};
use petgraph::visit::EdgeRef;

use crate::graph::Graph;
use crate::key::Key;
use crate::node::Node;

/// Optional filter narrowing the export to matching nodes.
///
/// The glob pattern is matched against the key display form and against every
/// debug label, so `*Duration*` catches both `to-script(time.Duration)` and
/// anything requested because of it.
pub struct NameFilter(Pattern);

impl NameFilter {
    pub fn new(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Self(Pattern::new(pattern)?))
    }

    fn matches(&self, key: &Key, node: &Node) -> bool {
        self.0.matches(&key.to_string()) || node.labels().iter().any(|label| self.0.matches(label))
    }
}

fn fill(graph: &Graph, key: &Key, node: &Node) -> (&'static str, &'static str) {
    if node.failure().is_some() {
        ("error", "#FF7F7F")
    } else if node.is_incomplete() {
        ("incomplete", "#FFD700")
    } else if graph.seeds().contains(key) {
        ("seed", "#90EE90")
    } else {
        ("ok", "#ADD8E6")
    }
}

fn kept<'a>(graph: &'a Graph, filter: Option<&NameFilter>) -> BTreeMap<&'a Key, (usize, &'a Node)> {
    graph
        .all_nodes()
        .filter(|(key, node)| filter.is_none_or(|f| f.matches(key, node)))
        .enumerate()
        .map(|(index, (key, node))| (key, (index, node)))
        .collect()
}

/// Renders the unpruned graph as a Mermaid diagram.
pub fn render_mermaid(graph: &Graph, filter: Option<&NameFilter>) -> String {
    use std::fmt::Write;

    let mut f = String::new();
    writeln!(f, "graph LR").unwrap();

    let kept = kept(graph, filter);

    for (key, (index, node)) in &kept {
        let name = key.to_string().replace('"', "\\\""); // Simple escape
        let (state, color) = fill(graph, key, node);

        writeln!(f, "    {index}[\"{name}\\n{state}\"]").unwrap();
        writeln!(f, "    style {index} fill:{color}").unwrap();
    }

    for (_, (index, node)) in &kept {
        for dep in node.deps() {
            let Some((target, _)) = kept.get(&dep.key) else {
                continue;
            };

            match dep.labels.first() {
                Some(label) => {
                    let label = label.replace('"', "\\\"");
                    writeln!(f, "    {index} -- \"{label}\" --> {target}").unwrap();
                }
                None => writeln!(f, "    {index} --> {target}").unwrap(),
            }
        }
    }

    f
}

/// Renders the unpruned graph in DOT format for graphviz tooling.
pub fn render_dot(graph: &Graph, filter: Option<&NameFilter>) -> String {
    let kept = kept(graph, filter);

    let mut export = petgraph::Graph::<String, String>::new();
    let mut fills = Vec::with_capacity(kept.len());
    let mut indices = BTreeMap::new();

    for (key, (_, node)) in &kept {
        let (_, color) = fill(graph, key, node);
        let index = export.add_node(key.to_string().replace('"', "\\\""));
        fills.push(color);
        indices.insert(*key, index);
    }

    for (key, (_, node)) in &kept {
        for dep in node.deps() {
            let Some(target) = indices.get(&dep.key) else {
                continue;
            };
            let label = dep
                .labels
                .first()
                .map(|label| label.replace('"', "\\\""))
                .unwrap_or_default();
            export.add_edge(indices[key], *target, label);
        }
    }

    let edge_attr = |_: &_, edge: petgraph::graph::EdgeReference<'_, String>| {
        let label = edge.weight();
        if label.is_empty() {
            String::new()
        } else {
            format!("label = \"{label}\"")
        }
    };
    let node_attr = |_: &_, (index, name): (petgraph::graph::NodeIndex, &String)| {
        format!(
            "label = \"{name}\" style = filled fillcolor = \"{}\"",
            fills[index.index()]
        )
    };
    let dot = Dot::with_attr_getters(
        &export,
        &[Config::NodeNoLabel, Config::EdgeNoLabel],
        &edge_attr,
        &node_attr,
    );

    format!("{dot}")
}

/// Renders the DOT export straight to a file.
pub fn render_dot_to_file(
    graph: &Graph,
    filter: Option<&NameFilter>,
    path: impl AsRef<std::path::Path>,
) -> Result<(), std::io::Error> {
    std::fs::write(path, render_dot(graph, filter))
}
