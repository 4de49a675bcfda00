//! `acp` operator binary
//!
//! Offline tooling around the pipeline: fingerprint passages, inspect word
//! diffs and animation timings, summarize or migrate an expansion
//! manifest, and check a configuration file. Logs go to stderr; results go
//! to stdout.

use acp_content::{
    apply_directory_renames, migrate_manifest, normalize, CacheSettings, ExpansionStore,
    Fingerprint, Manifest, MigrationPolicy, MigrationReport,
};
use acp_core::PipelineConfig;
use acp_diff::{
    animation_config, diff_chars, diff_words, ChangeKind, CharDiff, IntensityLevel, TransformKind,
    WordDiff,
};
use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REDACTED: &str = "<redacted>";

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn cli() -> Command {
    Command::new("acp")
        .version(acp_core::VERSION)
        .about("Adversarial content pipeline operator tools")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines (filter with RUST_LOG)"),
        )
        .subcommand(
            Command::new("fingerprint")
                .about("Print the format-insensitive fingerprint of a passage")
                .arg(
                    Arg::new("text")
                        .conflicts_with("file")
                        .help("Passage text; stdin is read when neither TEXT nor --file is given"),
                )
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_parser(value_parser!(PathBuf))
                        .help("Read the passage from a file"),
                )
                .arg(
                    Arg::new("show-normalized")
                        .long("show-normalized")
                        .action(ArgAction::SetTrue)
                        .help("Also print the normalized text that was hashed"),
                ),
        )
        .subcommand(
            Command::new("diff")
                .about("Align two passages word by word")
                .arg(Arg::new("old").long("old").required(true).help("Previous text"))
                .arg(Arg::new("new").long("new").required(true).help("Next text"))
                .arg(
                    Arg::new("chars")
                        .long("chars")
                        .action(ArgAction::SetTrue)
                        .help("Show the character alignment of changed words"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("animation")
                .about("Print scramble timings for a transform kind and level")
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .required(true)
                        .value_parser(["expand", "rewrite"])
                        .help("Transform kind"),
                )
                .arg(
                    Arg::new("level")
                        .long("level")
                        .value_parser(value_parser!(u8).range(1..=3))
                        .help("Rewrite intensity, 1-3"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("stats")
                .about("Summarize an expansion manifest")
                .arg(
                    Arg::new("manifest")
                        .long("manifest")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to manifest.json"),
                )
                .arg(Arg::new("chunk").long("chunk").help("Fingerprint of one chunk"))
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("migrate")
                .about("Recompute chunk fingerprints under the current normalization")
                .arg(
                    Arg::new("manifest")
                        .long("manifest")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to manifest.json"),
                )
                .arg(
                    Arg::new("root")
                        .long("root")
                        .value_parser(value_parser!(PathBuf))
                        .help("Chunk directory root (defaults to the manifest's directory)"),
                )
                .arg(
                    Arg::new("strict")
                        .long("strict")
                        .action(ArgAction::SetTrue)
                        .help("Fail if any chunk lacks embedded original text"),
                )
                .arg(
                    Arg::new("write")
                        .long("write")
                        .action(ArgAction::SetTrue)
                        .help("Rename chunk directories and rewrite the manifest"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("config")
                .about("Load a configuration file and print the effective settings")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to a TOML configuration file"),
                ),
        )
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("fingerprint", args)) => fingerprint(args),
        Some(("diff", args)) => diff(args),
        Some(("animation", args)) => animation(args),
        Some(("stats", args)) => stats(args).await,
        Some(("migrate", args)) => migrate(args).await,
        Some(("config", args)) => config(args),
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn required<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, name: &str) -> Result<&'a T> {
    args.get_one::<T>(name)
        .with_context(|| format!("--{name} is required"))
}

fn read_passage(args: &ArgMatches) -> Result<String> {
    if let Some(path) = args.get_one::<PathBuf>("file") {
        return std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()));
    }
    if let Some(text) = args.get_one::<String>("text") {
        return Ok(text.clone());
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("reading passage from stdin")?;
    Ok(text)
}

fn fingerprint(args: &ArgMatches) -> Result<()> {
    let text = read_passage(args)?;
    let hash = Fingerprint::of(&text);
    if args.get_flag("show-normalized") {
        println!("{hash}\t{}", normalize(&text));
    } else {
        println!("{hash}");
    }
    Ok(())
}

fn render_word(word: &WordDiff) -> String {
    let old = word.old_word.as_deref().unwrap_or_default();
    let new = word.new_word.as_deref().unwrap_or_default();
    match word.kind {
        ChangeKind::Unchanged => format!("  {old}"),
        ChangeKind::Changed => format!("~ {old} -> {new}"),
        ChangeKind::Added => format!("+ {new}"),
        ChangeKind::Removed => format!("- {old}"),
    }
}

fn render_chars(chars: &[CharDiff]) -> String {
    chars
        .iter()
        .map(|c| {
            let old = c.old_char.map(String::from).unwrap_or_default();
            let new = c.new_char.map(String::from).unwrap_or_default();
            match c.kind {
                ChangeKind::Unchanged => old,
                ChangeKind::Changed => format!("{old}>{new}"),
                ChangeKind::Added => format!("+{new}"),
                ChangeKind::Removed => format!("-{old}"),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn diff(args: &ArgMatches) -> Result<()> {
    let old = required::<String>(args, "old")?;
    let new = required::<String>(args, "new")?;
    let words = diff_words(old, new);

    if args.get_flag("json") {
        return print_json(&words);
    }

    for word in words.iter().filter(|w| !w.is_whitespace()) {
        println!("{}", render_word(word));
        if args.get_flag("chars") && word.kind == ChangeKind::Changed {
            let chars = diff_chars(
                word.old_word.as_deref().unwrap_or_default(),
                word.new_word.as_deref().unwrap_or_default(),
            );
            println!("    {}", render_chars(&chars));
        }
    }
    Ok(())
}

fn animation(args: &ArgMatches) -> Result<()> {
    let kind: TransformKind = required::<String>(args, "kind")?.parse()?;
    let level = args
        .get_one::<u8>("level")
        .copied()
        .map(IntensityLevel::new)
        .transpose()?;
    let config = animation_config(kind, level);

    if args.get_flag("json") {
        return print_json(&config);
    }

    println!("Animation for {kind}{}", level.map(|l| format!(" level {l}")).unwrap_or_default());
    println!("  Scramble duration: {}ms", config.scramble_duration_ms);
    println!("  Scramble steps: {}", config.scramble_steps);
    println!("  Stagger delay: {}ms", config.stagger_delay_ms);
    println!("  Chaotic glyphs: {}", config.chaotic);
    println!("  Intensity: {:.2}", config.intensity);
    Ok(())
}

async fn stats(args: &ArgMatches) -> Result<()> {
    let path = required::<PathBuf>(args, "manifest")?;
    let store = ExpansionStore::open(path, CacheSettings::default()).await?;
    let json = args.get_flag("json");

    if let Some(raw) = args.get_one::<String>("chunk") {
        let id: Fingerprint = raw
            .parse()
            .with_context(|| format!("'{raw}' is not a chunk fingerprint"))?;
        let stats = store
            .stats_for(&id)
            .with_context(|| format!("no chunk {id} in {}", path.display()))?;
        if json {
            return print_json(&stats);
        }
        println!("Chunk {id}");
        println!("  Versions: {}", stats.version_count);
        println!("  Passing: {}", stats.passing_count);
        println!("  Average score: {:.2}", stats.average_score);
        return Ok(());
    }

    let Some(stats) = store.global_stats() else {
        println!("{} has no chunks", path.display());
        return Ok(());
    };
    if json {
        return print_json(&stats);
    }
    println!("Expansion manifest {}", path.display());
    println!("  Chunks: {}", stats.chunk_count);
    println!("  Versions: {}", stats.version_count);
    println!("  Passing versions: {}", stats.passing_count);
    println!("  Chunks without a servable version: {}", stats.chunks_without_passing);
    println!("  Average score: {:.2}", stats.average_score);
    println!("  Pass rate: {:.1}%", stats.pass_rate * 100.0);
    Ok(())
}

fn print_migration(report: &MigrationReport) {
    println!("Fingerprint migration");
    println!("  Changed: {}", report.changed.len());
    for (old, new) in &report.changed {
        println!("    {old} -> {new}");
    }
    println!("  Unchanged: {}", report.unchanged);
    if !report.unmigratable.is_empty() {
        println!("  Kept without original text: {}", report.unmigratable.len());
        for hash in &report.unmigratable {
            println!("    {hash}");
        }
    }
}

async fn migrate(args: &ArgMatches) -> Result<()> {
    let path = required::<PathBuf>(args, "manifest")?;
    let policy = if args.get_flag("strict") {
        MigrationPolicy::Strict
    } else {
        MigrationPolicy::ReportAndKeep
    };

    let manifest = Manifest::load(path).await?;
    let (migrated, report) = migrate_manifest(&manifest, policy)?;

    if args.get_flag("json") {
        print_json(&report)?;
    } else {
        print_migration(&report);
    }

    if report.is_noop() {
        return Ok(());
    }
    if !args.get_flag("write") {
        eprintln!("dry run; pass --write to rename directories and rewrite the manifest");
        return Ok(());
    }

    let root = args
        .get_one::<PathBuf>("root")
        .cloned()
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let moved = apply_directory_renames(&root, &report).await?;
    migrated.save(path).await?;
    tracing::info!(
        moved,
        root = %root.display(),
        manifest = %path.display(),
        "fingerprint migration applied"
    );
    eprintln!("renamed {moved} chunk directories and rewrote {}", path.display());
    Ok(())
}

fn redact(mut config: PipelineConfig) -> PipelineConfig {
    if config.model.api_key.is_some() {
        config.model.api_key = Some(REDACTED.to_string());
    }
    config
}

fn config(args: &ArgMatches) -> Result<()> {
    let path = required::<PathBuf>(args, "file")?;
    let config = PipelineConfig::load(path)?;
    let configured = config.model.is_configured();

    print!("{}", toml::to_string_pretty(&redact(config))?);
    if !configured {
        eprintln!("model API key not set; transform and evaluation would be unavailable");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn level_outside_range_is_rejected() {
        let parsed = cli().try_get_matches_from(["acp", "animation", "--kind", "rewrite", "--level", "4"]);
        assert!(parsed.is_err());

        let parsed = cli()
            .try_get_matches_from(["acp", "animation", "--kind", "rewrite", "--level", "2"])
            .unwrap();
        let (_, args) = parsed.subcommand().unwrap();
        assert_eq!(args.get_one::<u8>("level"), Some(&2));
    }

    #[test]
    fn fingerprint_text_and_file_conflict() {
        let parsed = cli().try_get_matches_from(["acp", "fingerprint", "hello", "--file", "a.md"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn json_logs_is_global() {
        let parsed = cli()
            .try_get_matches_from(["acp", "diff", "--old", "a", "--new", "b", "--json-logs"])
            .unwrap();
        assert!(parsed.get_flag("json-logs"));
    }

    #[test]
    fn renders_word_slots() {
        let words = diff_words("a calm reply", "a furious reply");
        let rendered: Vec<_> = words
            .iter()
            .filter(|w| !w.is_whitespace())
            .map(render_word)
            .collect();
        assert_eq!(rendered, vec!["  a", "~ calm -> furious", "  reply"]);
    }

    #[test]
    fn renders_char_alignment() {
        let chars = diff_chars("cat", "cut");
        assert_eq!(render_chars(&chars), "c a>u t");
    }

    #[test]
    fn api_key_never_printed() {
        let mut config = PipelineConfig::default();
        config.model.api_key = Some("sk-live-secret".into());
        let printed = toml::to_string_pretty(&redact(config)).unwrap();
        assert!(!printed.contains("sk-live-secret"));
        assert!(printed.contains(REDACTED));
    }
}
