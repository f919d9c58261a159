use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use streamgrab::{EngineConfig, ReassembledMedia, RequestContext, ResolutionOrchestrator};

const USAGE: &str =
    "Usage: hls_fetch <playlist-url> [output-path] [-c config.json] [-H 'Name: value']...";

struct Args {
    url: String,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    request: RequestContext,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut request = RequestContext::new();

    let mut iter = raw.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = iter.next().context("-c needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "-H" | "--header" => {
                let header = iter.next().context("-H needs a header")?;
                let (name, value) = header
                    .split_once(':')
                    .with_context(|| format!("Header {:?} is not 'Name: value'", header))?;
                request = request.with_header(name.trim(), value.trim());
            }
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    let Some(url) = positional.next() else {
        bail!("missing playlist URL");
    };

    Ok(Args {
        url,
        output: positional.next().map(PathBuf::from),
        config,
        request,
    })
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from(path),
        None => Ok(EngineConfig::load_or_default()),
    }
}

async fn run(args: Args) -> Result<(PathBuf, ReassembledMedia)> {
    let config = load_config(args.config.as_deref())?;
    let engine = ResolutionOrchestrator::with_http(config)?;

    let media = engine
        .fetch_media(&args.url, args.request, |current, total| {
            eprint!("\rSegment {}/{}", current, total);
        })
        .await
        .with_context(|| format!("Failed to download {}", args.url))?;
    eprintln!();

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("output.{}", media.container.extension())));
    tokio::fs::write(&output, &media.bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok((output, media))
}

#[tokio::main]
async fn main() {
    if let Err(error) = streamgrab::init() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }

    let raw: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(error) => {
            eprintln!("Error: {error}");
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    match run(args).await {
        Ok((path, media)) => {
            let report = &media.report;
            println!("Saved: {}", path.display());
            println!("Type: {}", media.mime_hint());
            println!("Size: {} bytes", report.bytes_assembled);
            println!(
                "Segments: {}/{} ({} failed, {} kept encrypted)",
                report.segments_downloaded,
                report.segments_total,
                report.failed_count,
                report.decrypt_failures
            );
        }
        Err(error) => {
            eprintln!("Error: {error:#}");
            std::process::exit(1);
        }
    }
}
