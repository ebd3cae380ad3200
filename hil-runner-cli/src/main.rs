mod cli;

use std::{
    collections::{BTreeSet, HashMap},
    io::stdout,
    path::Path,
};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use cli::{Commands, Opt, OutputFormat, Selection};
use hil_device::{StationConfig, platform};
use hil_runner::{Patterns, SuiteManifest, Suites, select_suites};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Width of the labels of `list-tests`.
const LABEL_WIDTH: usize = 15;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    init_logging(opt.verbose)?;

    match opt.command {
        Commands::ListTests {
            selection,
            patterns,
            format,
        } => list_tests(&selection, &patterns, format).await,
        Commands::ListFixtures { selection, format } => list_fixtures(&selection, format).await,
        Commands::ListTags { manifest, format } => list_tags(&manifest, format).await,
        Commands::ListPlatforms { format } => {
            list_platforms(format);
            Ok(())
        }
        Commands::CheckConfig { config } => check_config(&config).await,
        Commands::GenerateCompletion { shell } => {
            generate_completion(shell);
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to register tracing_subscriber")
}

async fn load_station(path: &Path) -> anyhow::Result<StationConfig> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    StationConfig::from_json(&data)
        .with_context(|| format!("Invalid configuration: {}", path.display()))
}

async fn load_suites(manifest: &Path) -> anyhow::Result<Suites> {
    let manifest = SuiteManifest::load(manifest).await?;
    let mut suites = Suites::new();
    manifest.declare(&mut suites)?;
    debug!("Declared {} suites", suites.len());

    Ok(suites)
}

async fn select(selection: &Selection) -> anyhow::Result<Suites> {
    let mut suites = load_suites(&selection.manifest).await?;
    let station = match &selection.config {
        Some(path) => load_station(path).await?,
        None => StationConfig::default(),
    };
    select_suites(&station, &selection.filters, &mut suites)?;

    Ok(suites)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn label(s: &str) -> String {
    format!("{s:LABEL_WIDTH$}")
}

async fn list_tests(
    selection: &Selection,
    patterns: &[String],
    format: OutputFormat,
) -> anyhow::Result<()> {
    let suites = select(selection).await?;
    let patterns = Patterns::new(patterns);

    let entries: Vec<_> = suites
        .iter()
        .map(|s| {
            let fixtures: BTreeSet<&str> = s.fixtures.iter().map(|f| f.name.as_str()).collect();
            let tests: Vec<&str> = s
                .tests
                .iter()
                .map(|t| t.title.as_str())
                .filter(|t| patterns.matches(t))
                .collect();
            (s, fixtures, tests)
        })
        .collect();

    if format == OutputFormat::Json {
        let suites: Vec<_> = entries
            .iter()
            .map(|(s, fixtures, tests)| {
                json!({
                    "name": s.title,
                    "file": s.file,
                    "platforms": s.platforms.iter().map(|p| p.name()).collect::<Vec<_>>(),
                    "fixtures": fixtures,
                    "systemThreadModes": s.system_threads,
                    "systemModes": s.system_modes,
                    "tags": s.tags,
                    "tests": tests.iter().map(|t| json!({ "name": t })).collect::<Vec<_>>(),
                })
            })
            .collect();
        return print_json(&json!({ "suites": suites }));
    }

    let blocks: Vec<String> = entries
        .iter()
        .map(|(s, fixtures, tests)| {
            let mut lines = vec![label("suite:") + &s.title, label("file:") + &s.file];
            if !s.tags.is_empty() {
                lines.push(label("tags:") + &s.tags.join(", "));
            }
            let platforms: Vec<&str> = s.platforms.iter().map(|p| p.name()).collect();
            lines.push(label("platforms:") + &platforms.join(", "));
            if !fixtures.is_empty() {
                let fixtures: Vec<&str> = fixtures.iter().copied().collect();
                lines.push(label("fixtures:") + &fixtures.join(", "));
            }
            let threads: Vec<&str> = s.system_threads.iter().map(|m| m.as_str()).collect();
            lines.push(label("system thread:") + &threads.join(", "));
            let modes: Vec<&str> = s.system_modes.iter().map(|m| m.as_str()).collect();
            lines.push(label("system mode:") + &modes.join(", "));
            for (i, t) in tests.iter().enumerate() {
                let l = if i == 0 { label("tests:") } else { label("") };
                lines.push(format!("{l}{t}"));
            }
            lines.join("\n")
        })
        .collect();
    if !blocks.is_empty() {
        println!("{}", blocks.join("\n\n"));
    }

    Ok(())
}

async fn list_fixtures(selection: &Selection, format: OutputFormat) -> anyhow::Result<()> {
    let suites = select(selection).await?;
    let fixtures: BTreeSet<&str> = suites
        .iter()
        .flat_map(|s| s.fixtures.iter().map(|f| f.name.as_str()))
        .collect();

    match format {
        OutputFormat::Json => {
            let fixtures: Vec<_> = fixtures.iter().map(|f| json!({ "name": f })).collect();
            print_json(&json!({ "fixtures": fixtures }))
        }
        OutputFormat::Text => {
            for f in fixtures {
                println!("{f}");
            }
            Ok(())
        }
    }
}

/// Tags of all the declared suites, selected or not, and of all the platforms.
async fn list_tags(manifest: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let suites = load_suites(manifest).await?;
    let mut tags = suites.tags();
    tags.extend(platform::known_tags().into_iter().map(str::to_string));

    match format {
        OutputFormat::Json => print_json(&json!({ "tags": tags })),
        OutputFormat::Text => {
            for t in tags {
                println!("{t}");
            }
            Ok(())
        }
    }
}

fn list_platforms(format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let platforms: Vec<_> = platform::platforms()
                .iter()
                .map(|p| {
                    json!({
                        "id": p.id(),
                        "name": p.name(),
                        "displayName": p.display_name(),
                        "tags": p.tags(),
                    })
                })
                .collect();
            // Serializing plain JSON values does not fail
            if let Ok(s) = serde_json::to_string_pretty(&json!({ "platforms": platforms })) {
                println!("{s}");
            }
        }
        OutputFormat::Text => {
            const ID_HEADER: &str = "ID";
            const NAME_HEADER: &str = "Name";
            const DISPLAY_HEADER: &str = "Display Name";

            println!("{ID_HEADER:<4} {NAME_HEADER:<10} {DISPLAY_HEADER}");
            for p in platform::platforms() {
                println!("{:<4} {:<10} {}", p.id(), p.name(), p.display_name());
            }
        }
    }
}

async fn check_config(path: &Path) -> anyhow::Result<()> {
    let station = load_station(path).await?;

    match station.enabled_platforms()? {
        Some(ids) => {
            let mut names: Vec<&str> = platform::platforms()
                .iter()
                .filter(|p| ids.contains(&p.id()))
                .map(|p| p.name())
                .collect();
            names.sort_unstable();
            println!("{}{}", label("platforms:"), names.join(", "));
        }
        None => println!("{}all", label("platforms:")),
    }

    if !station.devices.is_empty() {
        println!("{}{}", label("devices:"), station.devices.join(", "));
    }

    let mut seen = BTreeSet::new();
    let mut owner = HashMap::new();
    for f in &station.fixtures {
        anyhow::ensure!(seen.insert(f.name.as_str()), "Duplicate fixture: {}", f.name);
        for d in &f.devices {
            if let Some(other) = owner.insert(d.as_str(), f.name.as_str()) {
                anyhow::ensure!(
                    other == f.name,
                    "Device {d} is assigned to fixtures {other} and {}",
                    f.name
                );
            }
        }
        println!("{}{}", label("fixture:"), f.name);
        println!("{}{}", label(""), f.devices.join(", "));
    }

    println!("Configuration is valid");
    Ok(())
}

fn generate_completion(target: clap_complete::Shell) {
    clap_complete::generate(
        target,
        &mut Opt::command(),
        env!("CARGO_PKG_NAME"),
        &mut stdout(),
    )
}
