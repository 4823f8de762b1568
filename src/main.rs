use anyhow::{Context, Result};
use assessment_linker::pipeline::{InstrumentRun, PipelineSummary};
use assessment_linker::report::write_outputs;
use assessment_linker::{Config, Pipeline};
use clap::{Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assessment_linker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = Command::new("assessment-linker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scores pre/post assessments, links them and merges them with registrar data")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory (overrides the configuration)"),
        )
        .arg(
            Arg::new("instrument")
                .short('i')
                .long("instrument")
                .value_name("NAME")
                .action(ArgAction::Append)
                .help("Only process this instrument; may be repeated"),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        Config::default()
            .save_to_file(config_file)
            .with_context(|| format!("Failed to write {}", config_file))?;
        println!(
            "⚠️  Please edit {} and point it at your data files, then run the program again.",
            config_file
        );
        return Ok(());
    };

    let output_dir: PathBuf = matches
        .get_one::<String>("output")
        .cloned()
        .or_else(|| config.output_directory.clone())
        .unwrap_or_else(|| "output".to_string())
        .into();
    let only: Vec<String> = matches
        .get_many::<String>("instrument")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    println!("🗂️  Registrar file: {}", config.registrar.file);
    match &config.consent {
        Some(consent) => println!("🚫 Opt-out list: {}", consent.file),
        None => println!("🚫 Opt-out list: none"),
    }
    if only.is_empty() {
        println!("🎯 Instruments: ALL ({})", instrument_names(&config).join(", "));
    } else {
        println!("🎯 Instruments: {}", only.join(", "));
    }
    println!("📄 Output directory: {}", output_dir.display());

    let pipeline = Pipeline::load(&config).context("Failed to prepare roster")?;
    info!("Roster holds {} records", pipeline.roster().len());

    let summary = pipeline.run(&only)?;
    let written = write_outputs(&summary, &config.output_columns, &output_dir)
        .context("Failed to write output tables")?;

    print_summary(&summary);
    println!("\n📂 Files written:");
    for path in &written {
        println!("   {}", path.display());
    }

    if summary.runs.is_empty() && !summary.failures.is_empty() {
        anyhow::bail!("every instrument failed");
    }
    Ok(())
}

fn instrument_names(config: &Config) -> Vec<&str> {
    config.instruments.iter().map(|i| i.name.as_str()).collect()
}

fn print_summary(summary: &PipelineSummary) {
    println!("\n📊 SUMMARY");
    println!("==========\n");

    let roster = &summary.roster;
    println!(
        "👥 Roster: {} rows read, {} repeats, {} opted out, {} ineligible, {} without ID",
        roster.rows_read,
        roster.repeats_dropped,
        roster.opted_out,
        roster.ineligible,
        roster.missing_identity
    );

    for run in &summary.runs {
        print_run(run);
    }

    for failure in &summary.failures {
        println!("\n❌ {} failed: {}", failure.name, failure.error);
    }
}

fn print_run(run: &InstrumentRun) {
    let report = &run.report;
    println!("\n📝 {}", run.name);
    for (side, cleaning) in [("pre", &report.pre), ("post", &report.post)] {
        println!(
            "   {:<4} {} read → {} kept ({} too fast, {} failed check, {} duplicates, {} opted out)",
            side,
            cleaning.rows_read,
            cleaning.kept,
            cleaning.too_fast,
            cleaning.failed_attention,
            cleaning.duplicates,
            cleaning.opted_out
        );
    }

    let matching = &report.matching;
    let by_key: Vec<String> = matching
        .pairs_by_key
        .iter()
        .map(|(key, n)| format!("{} by {}", n, key))
        .collect();
    println!(
        "   🔗 {} pairs ({}), {} pre only, {} post only",
        matching.total_pairs(),
        by_key.join(", "),
        matching.unmatched_pre,
        matching.unmatched_post
    );
    if !matching.ambiguities.is_empty() {
        println!("   ⚠️  {} ambiguous candidates (see log)", matching.ambiguities.len());
    }

    let merge = &report.merge;
    println!(
        "   🏫 {} merged rows: {} by student ID, {} by login, {} enrolled without scores, {} unrostered",
        run.merged.len(),
        merge.merged_by_primary,
        merge.merged_by_secondary,
        merge.roster_only,
        merge.unrostered
    );
    if merge.conflicts > 0 {
        println!("   ⚠️  {} registrar merge conflicts", merge.conflicts);
    }
}
