use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use folio::document::package::ArchiveError;
use folio::{bundle, Model, PackagedDocument, RenderError, RenderReport};

/// Render an office-document template with a JSON data model.
#[derive(Parser)]
#[command(name = "folio", version, about)]
struct Cli {
    /// Template document (.odt, .ott or .docx)
    #[arg(short, long)]
    template: PathBuf,

    /// JSON file with the data model ({"data": {...}, "metadata": {...}})
    #[arg(short, long)]
    model: PathBuf,

    /// Output document path
    #[arg(short, long)]
    output: PathBuf,

    /// Write a diagnostic bundle (zip) to this path
    #[arg(short, long)]
    bundle: Option<PathBuf>,

    /// Include the template source and rendered XML in the bundle
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut report = RenderReport::default();
    let outcome = run(&cli, &mut report);

    // The bundle is written even after a failure, with whatever partial
    // artifacts the run produced.
    if let Some(path) = &cli.bundle {
        if let Err(err) = write_bundle(path, &report, cli.debug) {
            log::warn!("writing bundle {}: {err}", path.display());
        }
    }

    if let Err(err) = outcome {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run(cli: &Cli, report: &mut RenderReport) -> Result<(), RenderError> {
    let model: Model = serde_json::from_slice(&fs::read(&cli.model)?)?;
    let document = PackagedDocument::open_path(&cli.template)?;
    log::info!("rendering {} ({})", cli.template.display(), document.mime_type());

    let rendered = document.render(&model, report)?;
    fs::write(&cli.output, rendered)?;
    println!("rendered {} -> {}", cli.template.display(), cli.output.display());
    Ok(())
}

fn write_bundle(path: &Path, report: &RenderReport, debug: bool) -> Result<(), ArchiveError> {
    fs::write(path, bundle::write(report, debug)?)?;
    Ok(())
}
