use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Opt {
    #[command(subcommand)]
    /// Specifies the subcommand to execute.
    pub command: Commands,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    /// Increase logging verbosity. Can be repeated. `RUST_LOG` takes precedence.
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the selected suites and their tests.
    ListTests {
        #[command(flatten)]
        selection: Selection,

        #[arg(short = 't', long = "test")]
        /// Select tests by name. Regular expressions are supported.
        patterns: Vec<String>,

        #[arg(long, value_enum, default_value_t)]
        /// Output format.
        format: OutputFormat,
    },

    /// List the fixtures required by the selected suites.
    ListFixtures {
        #[command(flatten)]
        selection: Selection,

        #[arg(long, value_enum, default_value_t)]
        /// Output format.
        format: OutputFormat,
    },

    /// List the suite and platform tags that can be used as filters.
    ListTags {
        #[arg(long, default_value = "suites.json")]
        /// Suite manifest.
        manifest: PathBuf,

        #[arg(long, value_enum, default_value_t)]
        /// Output format.
        format: OutputFormat,
    },

    /// List the supported platforms.
    ListPlatforms {
        #[arg(long, value_enum, default_value_t)]
        /// Output format.
        format: OutputFormat,
    },

    /// Validate a station configuration file.
    CheckConfig {
        /// Station configuration (JSON).
        config: PathBuf,
    },

    /// Command to generate shell completion
    GenerateCompletion {
        /// Specifies the target shell type for completion
        shell: clap_complete::Shell,
    },
}

#[derive(Args, Debug)]
pub struct Selection {
    #[arg(long, default_value = "suites.json")]
    /// Suite manifest.
    pub manifest: PathBuf,

    #[arg(long)]
    /// Station configuration. Its platforms restrict the selected suites.
    pub config: Option<PathBuf>,

    #[arg(allow_hyphen_values = true)]
    /// Suite files, directories, suite tags or platform tags. Prefix a filter with `-` to
    /// exclude what it names.
    pub filters: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
