use indicatif::ProgressStyle;

/// Upper-cases the first character, `debug` -> `Debug`.
pub(crate) fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Installs a `tracing` subscriber writing through `indicatif`, so log lines
/// and task progress bars don't trample each other.
///
/// The filter is read from `RUST_LOG` and defaults to `info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()?;

    Ok(())
}

pub(crate) fn get_style_task() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub(crate) fn get_style_build() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}
