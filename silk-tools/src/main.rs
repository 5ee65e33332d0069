//! silkinfo - describe the header of SiLK files

use anyhow::{bail, Context};
use serde::Serialize;
use silk_core::compression::CompressionMethod;
use silk_core::header::HeaderSummary;
use silk_core::iobuf::IoMode;
use silk_core::stream::{pathname_is_compressed, ContentType, Stream};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const USAGE: &str = "Usage: silkinfo [--json] FILE...";

/// Command-line options
#[derive(Debug, Default, PartialEq)]
struct Options {
    json: bool,
    files: Vec<String>,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Options> {
    let mut options = Options::default();
    let mut only_files = false;
    for arg in args {
        if only_files || !arg.starts_with("--") {
            options.files.push(arg);
            continue;
        }
        match arg.as_str() {
            "--" => only_files = true,
            "--json" => options.json = true,
            other => bail!("Unknown option '{}'\n{}", other, USAGE),
        }
    }
    if options.files.is_empty() {
        bail!("No files given\n{}", USAGE);
    }
    Ok(options)
}

/// Everything reported for one file
#[derive(Debug, Serialize)]
struct FileReport {
    path: String,
    /// Bytes on disk; absent for standard input
    file_size: Option<u64>,
    /// Known only for uncompressed fixed-length records
    record_count: Option<u64>,
    #[serde(flatten)]
    header: HeaderSummary,
    #[serde(skip)]
    text: String,
}

fn describe(path: &str) -> anyhow::Result<FileReport> {
    let mut stream = Stream::create(IoMode::Read, ContentType::SilkBinary);
    stream
        .bind(path)
        .with_context(|| format!("Cannot use '{}'", path))?;
    stream
        .open()
        .with_context(|| format!("Cannot open '{}'", path))?;
    let header = stream
        .read_silk_header()
        .with_context(|| format!("Cannot read header of '{}'", path))?;

    let mut text = String::new();
    header.print(&mut text)?;
    let summary = header.summary();

    let file_size = std::fs::metadata(path).ok().map(|m| m.len());
    let record_count = match file_size {
        Some(size)
            if summary.record_length > 0
                && header.compression_method() == Some(CompressionMethod::None)
                && !pathname_is_compressed(Path::new(path), IoMode::Read) =>
        {
            let data = size.saturating_sub(summary.header_length as u64);
            Some(data / summary.record_length as u64)
        }
        _ => None,
    };
    debug!("{}: record count {:?}", path, record_count);

    stream.close()?;
    Ok(FileReport {
        path: path.to_string(),
        file_size,
        record_count,
        header: summary,
        text,
    })
}

fn render(report: &FileReport, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(report)?);
    }
    let mut out = format!("{}:\n{}", report.path, report.text);
    if let Some(size) = report.file_size {
        out.push_str(&format!("  {:<20}{}\n", "file-size", size));
    }
    if let Some(count) = report.record_count {
        out.push_str(&format!("  {:<20}{}\n", "count-records", count));
    }
    Ok(out.trim_end().to_string())
}

fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("silkinfo: {:#}", e);
            return ExitCode::from(2);
        }
    };

    silk_core::initialize();
    let mut failed = false;
    for path in &options.files {
        match describe(path).and_then(|report| render(&report, options.json)) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                error!("{:#}", e);
                eprintln!("silkinfo: {:#}", e);
                failed = true;
            }
        }
    }
    silk_core::teardown();

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
