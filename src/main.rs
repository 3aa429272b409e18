use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use video_summary_rust::{Config, LLMProvider, Pipeline, SourceInput};

fn cli() -> Command {
    Command::new("Video Summary (Rust)")
        .version("0.1.0")
        .author("TigreRoll")
        .about("Turns long lecture videos into illustrated, chunk-by-chunk study notes")
        .arg(
            Arg::new("url")
                .value_name("URL")
                .help("Video page URL (YouTube, Bilibili, ...)")
                .conflicts_with_all(["video", "subtitle", "input-dir"])
        )
        .arg(
            Arg::new("video")
                .long("video")
                .value_name("FILE")
                .help("Local video file")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("subtitle")
                .long("subtitle")
                .value_name("FILE")
                .help("Local SRT/VTT subtitle file")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("input-dir")
                .long("input-dir")
                .value_name("DIR")
                .help("Summarize every .srt/.vtt/.txt under DIR (text only)")
                .value_parser(value_parser!(PathBuf))
                .conflicts_with_all(["video", "subtitle"])
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory [default: output]")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("SECONDS")
                .help("Frame sampling interval [default: 2.0]")
                .value_parser(value_parser!(f64))
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .help("Write the prompts instead of calling the model")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("cookies")
                .short('c')
                .long("cookies")
                .value_name("FILE")
                .help("Cookies file for sites that need a login")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("text-only")
                .long("text-only")
                .help("Skip video download and frame extraction")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("title")
                .long("title")
                .value_name("TITLE")
                .help("Override the derived title")
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Maximum concurrent producer calls")
                .value_parser(value_parser!(usize))
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("provider")
                .long("provider")
                .value_name("NAME")
                .help("Summary model provider")
                .value_parser(["gemini", "openai", "lmstudio"])
        )
        .arg(
            Arg::new("model")
                .long("model")
                .value_name("MODEL")
                .help("Summary model name")
        )
        .arg(
            Arg::new("prompt")
                .long("prompt")
                .value_name("FILE")
                .help("Prompt template with {current} and {total} placeholders")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("dedup-captions")
                .long("dedup-captions")
                .help("Remove rolling-caption repetition before chunking")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("strip-part-headers")
                .long("strip-part-headers")
                .help("Remove the per-part headings from the final document")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("include-transcript")
                .long("include-transcript")
                .help("Add each part's transcript in a collapsible block")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("no-cache")
                .long("no-cache")
                .help("Do not reuse or store model summaries")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
        )
}

/// Command line flags win over file and environment settings
fn apply_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(output) = matches.get_one::<PathBuf>("output") {
        config.output.base_dir = output.clone();
    }
    if let Some(interval) = matches.get_one::<f64>("interval") {
        config.processing.interval_secs = *interval;
    }
    if let Some(cookies) = matches.get_one::<PathBuf>("cookies") {
        config.processing.cookies_path = Some(cookies.clone());
    }
    if let Some(title) = matches.get_one::<String>("title") {
        config.output.title = Some(title.clone());
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.performance.max_workers = *workers;
    }
    if let Some(provider) = matches.get_one::<String>("provider") {
        let provider = match provider.as_str() {
            "openai" => LLMProvider::OpenAI,
            "lmstudio" => LLMProvider::LMStudio,
            _ => LLMProvider::Gemini,
        };
        if provider != config.llm.provider {
            config.llm.provider = provider;
            config.llm.api_key = provider
                .api_key_env()
                .and_then(|env| std::env::var(env).ok())
                .filter(|key| !key.trim().is_empty());
        }
    }
    if let Some(model) = matches.get_one::<String>("model") {
        config.llm.model = model.clone();
    }
    if let Some(prompt) = matches.get_one::<PathBuf>("prompt") {
        config.processing.prompt_file = Some(prompt.clone());
    }

    let processing = &mut config.processing;
    processing.test_mode |= matches.get_flag("test");
    processing.text_only |= matches.get_flag("text-only");
    processing.dedupe_captions |= matches.get_flag("dedup-captions");

    let output = &mut config.output;
    output.strip_part_headers |= matches.get_flag("strip-part-headers");
    output.include_transcript |= matches.get_flag("include-transcript");
    if matches.get_flag("no-cache") {
        output.cache_summaries = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    // Initialize logging
    let default_filter = if matches.get_flag("verbose") {
        "video_summary_rust=debug,warn"
    } else {
        "video_summary_rust=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = Config::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    apply_overrides(&mut config, &matches);

    let input_dir = matches.get_one::<PathBuf>("input-dir").cloned();
    if input_dir.is_some() {
        config.processing.text_only = true;
    }

    info!("🚀 Video Summary (Rust) starting...");
    info!("{}", config.summary());

    let pipeline = Pipeline::new(config)?;

    if let Some(input_dir) = input_dir {
        let results = pipeline.run_batch(&input_dir).await?;

        info!("🎉 Batch completed in {:.2}s", results.total_time.as_secs_f64());
        info!("✅ Successful: {}", results.successful);
        info!("❌ Failed: {}", results.failed);
        return Ok(());
    }

    let input = match matches.get_one::<String>("url") {
        Some(url) => SourceInput::Url(url.clone()),
        None => SourceInput::Local {
            video: matches.get_one::<PathBuf>("video").cloned(),
            subtitle: matches.get_one::<PathBuf>("subtitle").cloned(),
        },
    };
    if matches!(input, SourceInput::Local { video: None, subtitle: None }) {
        error!("Give a URL, --video, --subtitle or --input-dir");
        return Err(anyhow!("no input given"));
    }

    let outcome = pipeline.run(&input).await?;

    info!(
        "🎉 {} parts summarized in {:.2}s",
        outcome.chunk_count,
        outcome.processing_time.as_secs_f64()
    );
    if !outcome.failed_chunks.is_empty() {
        warn!("❌ Failed parts: {:?}", outcome.failed_chunks);
    }
    info!("✅ Done! Result file: {}", outcome.document_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let matches = cli()
            .try_get_matches_from([
                "video-summary",
                "--subtitle",
                "talk.srt",
                "-i",
                "5",
                "-w",
                "3",
                "--test",
                "--text-only",
                "--title",
                "Talk",
            ])
            .unwrap();

        let mut config = Config::default();
        apply_overrides(&mut config, &matches);

        assert_eq!(config.processing.interval_secs, 5.0);
        assert_eq!(config.performance.max_workers, 3);
        assert!(config.processing.test_mode);
        assert!(config.processing.text_only);
        assert_eq!(config.output.title.as_deref(), Some("Talk"));
    }

    #[test]
    fn test_url_conflicts_with_local_files() {
        let result = cli().try_get_matches_from([
            "video-summary",
            "https://example.com/v",
            "--video",
            "a.mp4",
        ]);
        assert!(result.is_err());
    }
}
