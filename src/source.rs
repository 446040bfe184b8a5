use camino::Utf8PathBuf;

use crate::builder::Probe;
use crate::key::Request;

/// Result from a single artifact calculation.
pub type CalcResult<T> = anyhow::Result<T, anyhow::Error>;

/// One successfully calculated conversion artifact, as returned by an
/// [`ArtifactSource`].
#[derive(Debug, Clone, Default)]
pub struct Artifact {
    /// Generated conversion code. The engine treats it as opaque text.
    pub code: String,
    /// Further artifacts this one requires.
    pub deps: Vec<Request>,
    /// External resource paths the output file must import for this code.
    pub imports: Vec<Utf8PathBuf>,
}

impl Artifact {
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn depend(mut self, request: Request) -> Self {
        self.deps.push(request);
        self
    }

    pub fn import(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.imports.push(path.into());
        self
    }
}

/// The pluggable type-mapping layer: turns one conversion request into code.
///
/// The engine invokes `resolve` at most once per distinct [`Key`](crate::Key)
/// within one build. Implementations must be pure with respect to the key:
/// the same key yields the same result on every call within a build. Stateful
/// or non-deterministic implementations are outside the contract and get no
/// defined behavior.
///
/// Before committing to a dependency, an implementation may ask the [`Probe`]
/// whether a candidate conversion would ultimately succeed, and pick a
/// degraded representation when it would not, rather than failing the whole
/// containing type. Probing its own key always answers `true`.
pub trait ArtifactSource {
    fn resolve(&self, request: &Request, probe: &mut Probe<'_>) -> CalcResult<Artifact>;
}

impl<F> ArtifactSource for F
where
    F: Fn(&Request, &mut Probe<'_>) -> CalcResult<Artifact>,
{
    fn resolve(&self, request: &Request, probe: &mut Probe<'_>) -> CalcResult<Artifact> {
        self(request, probe)
    }
}
