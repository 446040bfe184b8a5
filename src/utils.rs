use std::collections::HashSet;
use std::sync::LazyLock;

use indicatif::ProgressStyle;

pub(crate) static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("#>-")
});

pub(crate) fn format_active(active: &HashSet<String>) -> String {
    const MAX: usize = 5;
    let mut names: Vec<_> = active.iter().cloned().collect();
    names.sort();

    if names.len() <= MAX {
        names.join(", ")
    } else {
        format!("{}… ({} total)", names[..MAX].join(", "), names.len())
    }
}

/// Initializes log output for the library, filtered through `RUST_LOG`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .map_err(|err| anyhow::anyhow!("{err}"))?;

    Ok(())
}
