#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod builder;
mod diagnostics;
mod error;
mod graph;
mod key;
mod node;
mod output;
mod source;
mod utils;

pub use crate::builder::{BuildJob, Probe, build, build_all};
pub use crate::diagnostics::{NameFilter, render_dot, render_dot_to_file, render_mermaid};
pub use crate::error::{CalcError, KakehashiError, OutputError, Reason};
pub use crate::graph::Graph;
pub use crate::key::{Direction, Key, Request};
pub use crate::node::Node;
pub use crate::output::{Bundle, ImportSet};
pub use crate::source::{Artifact, ArtifactSource, CalcResult};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
