use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devbridge::bundle::{apply_partial_bundle, diff_bundle, Bundle, ContentListing};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devbridge-bundle")]
#[command(about = "Inspect, diff and replay app bundles", long_about = None)]
struct Cli {
    /// Log debug output (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the content listing of a bundle as JSON
    Listing {
        bundle: PathBuf,
    },

    /// Build a partial bundle against an installed content listing
    Diff {
        bundle: PathBuf,
        listing: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replay a partial bundle on top of an installed bundle
    Apply {
        installed: PathBuf,
        partial: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn read_bundle(path: &Path) -> Result<Bundle> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Bundle::from_zip(&data).with_context(|| format!("parsing bundle {}", path.display()))
}

fn write_bundle(path: &Path, bundle: &Bundle) -> Result<()> {
    let data = bundle.to_zip()?;
    std::fs::write(path, &data).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("Wrote {} ({} bytes)", path.display(), data.len());
    Ok(())
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Listing { bundle } => {
            let listing = ContentListing::from_bundle(&read_bundle(&bundle)?);
            println!("{}", String::from_utf8(listing.to_json()?)?);
        }
        Command::Diff {
            bundle,
            listing,
            output,
        } => {
            let bundle = read_bundle(&bundle)?;
            let text = std::fs::read(&listing)
                .with_context(|| format!("reading {}", listing.display()))?;
            let listing = ContentListing::from_json(&text)?;
            match diff_bundle(bundle, &listing)? {
                Some(partial) => write_bundle(&output, &partial)?,
                None => println!("Installed content is up to date; nothing to write"),
            }
        }
        Command::Apply {
            installed,
            partial,
            output,
        } => {
            let bundle = apply_partial_bundle(&read_bundle(&installed)?, &read_bundle(&partial)?)?;
            write_bundle(&output, &bundle)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(cli.command)
}
