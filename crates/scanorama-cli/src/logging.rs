//! Logging initialization from the `logging` config section.

use std::fs::OpenOptions;

use tracing_subscriber::EnvFilter;

use scanorama_core::config::LoggingConfig;

/// Install the global subscriber. An explicit log-file path (from the
/// daemon) overrides the configured output.
pub fn init(config: &LoggingConfig, log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let output = log_file.unwrap_or(config.output.as_str());
    let json = config.format == "json";

    match output {
        "stdout" => install(filter, json, config.add_source, std::io::stdout),
        "stderr" => install(filter, json, config.add_source, std::io::stderr),
        path => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            install(filter, json, config.add_source, std::sync::Arc::new(file))
        }
    }
    Ok(())
}

fn install<W>(filter: EnvFilter, json: bool, add_source: bool, writer: W)
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_file(add_source)
        .with_line_number(add_source);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
