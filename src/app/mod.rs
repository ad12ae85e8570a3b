use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use crate::config::{ExtractsConfig, StrategyOptions};
use crate::extract::Extract;
use crate::metadata::MetaAttribute;
use crate::sinks::SinkOptions;
use crate::source::{ElementSource, PbfSource};
use crate::strategy::{DEFAULT_STRATEGY, ExtractData, Strategy, create_strategy};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input PBF file, sorted by type then id (`-` reads standard input)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Extracts configuration file (YAML, JSON or TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Output directory, overrides `directory` from the config file
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Extraction strategy (smart_custom, smart_by_first_node_and_tags)
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Strategy option as KEY=VALUE, a bare KEY means KEY=true (repeatable)
    #[arg(short = 'S', long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Replace existing output files
    #[arg(long)]
    pub overwrite: bool,

    /// Metadata attributes to leave out (version, changeset, timestamp, uid, user)
    #[arg(long, value_delimiter = ',')]
    pub clean: Vec<MetaAttribute>,

    /// Number of threads (default: all cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not show the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl Cli {
    /// Options from the config file, overridden by the command line.
    pub fn strategy_options(&self, config: &ExtractsConfig) -> StrategyOptions {
        let mut options = StrategyOptions::new();
        for (key, value) in &config.options {
            options.set(key.as_str(), value.as_str());
        }
        for assignment in &self.options {
            options.set_assignment(assignment);
        }
        options
    }

    pub fn show_progress(&self) -> bool {
        !self.no_progress && !self.verbose
    }
}

pub fn run(cli: &Cli) -> Result<()> {
    let config = ExtractsConfig::load(&cli.config)?;
    let options = cli.strategy_options(&config);
    let strategy_name = cli
        .strategy
        .as_deref()
        .or(config.strategy.as_deref())
        .unwrap_or(DEFAULT_STRATEGY);
    let strategy = create_strategy(strategy_name, &options)?;

    let source = PbfSource::open(&cli.input)?;
    tracing::info!(
        "Input: {} ({} bytes), strategy '{}'",
        source.name(),
        source.size_bytes(),
        strategy.name()
    );
    if !options.is_empty() {
        tracing::info!("Strategy options: {}", options);
    }

    // Fail before any output file is created
    strategy.check_source(&source)?;

    let sink_options = SinkOptions {
        overwrite: cli.overwrite,
        clean: cli.clean.clone(),
    };
    let mut created = Vec::new();
    let start = std::time::Instant::now();
    let result = extract_all(
        cli,
        &config,
        strategy.as_ref(),
        &source,
        &sink_options,
        &mut created,
    );
    match result {
        Ok(count) => {
            tracing::info!(
                "Done! Wrote {} extracts in {:.2}s",
                count,
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(err) => {
            remove_outputs(&created);
            Err(err)
        }
    }
}

/// Opens every extract, runs the strategy and closes the outputs. Paths of
/// the files created so far are pushed to `created`.
fn extract_all(
    cli: &Cli,
    config: &ExtractsConfig,
    strategy: &dyn Strategy,
    source: &dyn ElementSource,
    sink_options: &SinkOptions,
    created: &mut Vec<PathBuf>,
) -> Result<usize> {
    let mut extracts = Vec::with_capacity(config.extracts.len());
    for extract_config in &config.extracts {
        let extract = Extract::open(
            config,
            extract_config,
            cli.directory.as_deref(),
            sink_options,
        )?;
        let output = config.output_path(extract_config, cli.directory.as_deref());
        if output != Path::new("-") {
            created.push(output);
        }
        extract.log_summary();
        extracts.push(ExtractData::new(Box::new(extract)));
    }
    strategy.show_arguments();

    strategy.run(&mut extracts, source, cli.show_progress())?;

    for data in &mut extracts {
        data.finish()
            .with_context(|| format!("Extract: Failed to close {}", data.name()))?;
    }
    Ok(extracts.len())
}

/// Deletes outputs of a failed run so they do not block the next one.
fn remove_outputs(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!("Removed partial output {:?}", path),
            Err(err) => tracing::warn!("Failed to remove partial output {:?}: {}", path, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(
            ["carve", "-i", "planet.osm.pbf", "-c", "extracts.yaml"]
                .iter()
                .chain(args),
        )
    }

    #[test]
    fn parses_repeated_options_and_clean_list() {
        let cli = cli(&[
            "-S",
            "relations=type:multipolygon",
            "--option",
            "by-first-node",
            "--clean",
            "user,uid",
        ]);
        assert_eq!(cli.options.len(), 2);
        assert_eq!(cli.clean, vec![MetaAttribute::User, MetaAttribute::Uid]);
        assert!(cli.show_progress());
    }

    #[test]
    fn command_line_options_override_config_options() {
        let cli = cli(&["-S", "relations=type:route"]);
        let config = ExtractsConfig {
            directory: None,
            strategy: None,
            options: [
                ("relations".to_string(), "type:multipolygon".to_string()),
                ("by-first-node".to_string(), "yes".to_string()),
            ]
            .into_iter()
            .collect(),
            extracts: Vec::new(),
            base_dir: PathBuf::new(),
        };
        let options = cli.strategy_options(&config);
        assert_eq!(options.get("relations"), Some("type:route"));
        assert_eq!(options.get("by-first-node"), Some("yes"));
    }

    #[test]
    fn verbose_disables_progress() {
        assert!(!cli(&["-v"]).show_progress());
        assert!(!cli(&["--no-progress"]).show_progress());
    }
}
