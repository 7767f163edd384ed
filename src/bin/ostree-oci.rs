use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ocidir::OciDir;
use ostree_oci::config::DEFAULT_COMPRESSION_LEVEL;
use ostree_oci::{ConvertOptions, Converter, ImageName, OstreeRepo};

/// Convert an OSTree commit into an OCI image layout directory.
#[derive(Debug, Parser)]
#[command(name = "ostree-oci", version)]
struct Cli {
    /// OSTree repository holding the commit
    #[arg(long, env = "OSTREE_REPO")]
    repo: PathBuf,

    /// Output directory (defaults to the image name); must not exist
    #[arg(long)]
    dest: Option<PathBuf>,

    /// gzip level, 0 (none) to 9 (best)
    #[arg(
        long,
        default_value_t = DEFAULT_COMPRESSION_LEVEL,
        value_parser = clap::value_parser!(u32).range(0..=9)
    )]
    compression: u32,

    /// JSON object merged into the image config's `config` field
    #[arg(long = "config", value_name = "FILE")]
    user_config: Option<PathBuf>,

    /// Target architecture; inferred from REF when omitted
    #[arg(long)]
    arch: Option<String>,

    /// Re-read and check the finished layout
    #[arg(long)]
    verify: bool,

    /// ostree executable to run
    #[arg(long, env = "OSTREE_BIN", default_value = "ostree")]
    ostree_bin: PathBuf,

    /// Ref or commit checksum to convert
    #[arg(value_name = "REF")]
    reference: String,

    /// Image name, `name[:tag]`
    #[arg(value_name = "NAME:TAG")]
    image: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let image = ImageName::parse(&cli.image)?;

    let mut opts = ConvertOptions::new(cli.reference, image).compression(cli.compression);
    if let Some(dest) = cli.dest {
        opts = opts.dest(dest);
    }
    if let Some(path) = cli.user_config {
        opts = opts.user_config(path);
    }
    if let Some(arch) = cli.arch {
        opts = opts.architecture(arch);
    }

    let converter = Converter::new(OstreeRepo::new(cli.repo).with_binary(cli.ostree_bin));
    let report = converter.convert(&opts).await?;

    if let Some(default) = &report.arch_fallback {
        eprintln!(
            "notice: no known architecture in {:?}; defaulted to {} (use --arch to override)",
            opts.reference, default
        );
    }

    if cli.verify {
        let summary = OciDir::open(&report.dest)?.verify()?;
        println!("verified: {} manifest(s), {} blob(s)", summary.manifests, summary.blobs);
    }

    println!("image: {}", report.image);
    println!("dest: {}", report.dest.display());
    println!("commit: {}", report.commit);
    println!(
        "platform: {}/{}",
        report.platform.os, report.platform.architecture
    );
    println!("manifest: {}", report.manifest.digest);
    println!("config: {}", report.config.digest);
    println!(
        "layer: {} ({} bytes, diff_id {})",
        report.layer.blob.digest, report.layer.blob.size, report.layer.diff_id
    );
    Ok(())
}
