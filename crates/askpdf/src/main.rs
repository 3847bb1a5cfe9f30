mod cli;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use futures::future::join_all;
use tracing_subscriber::EnvFilter;

use askpdf::{
    extract_highlight_region, load_config, load_pdf_with_annotations, report, settings_schema,
    AskPdf, CommandError, GraphHost, PdfAsset, PDF_PATH_PROPERTY,
};
use askpdf_core::DefaultPdfBackend;

use crate::cli::{Cli, Command};

const PREVIEW_CHARS: usize = 60;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Ask { page, lines } => ask(&cli.config, &page, &lines).await,
        Command::Highlights { page } => highlights(&page).await,
        Command::Crop { page, id, out } => crop(&page, &id, &out).await,
        Command::SettingsSchema => {
            println!("{}", serde_json::to_string_pretty(&settings_schema())?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_page(page: &Path) -> Result<GraphHost> {
    GraphHost::open(page).with_context(|| format!("failed to open page {}", page.display()))
}

async fn ask(config: &Path, page: &Path, lines: &[usize]) -> Result<()> {
    let settings = load_config(config)?;
    let host = open_page(page)?;
    let mut blocks = Vec::new();
    for line in lines {
        let block = host
            .block_at_line(*line)
            .ok_or_else(|| anyhow!("line {line} of {} is not inside a block", page.display()))?;
        if !blocks.contains(&block.id) {
            blocks.push(block.id);
        }
    }
    let command = match AskPdf::from_settings(&settings) {
        Ok(command) => command,
        Err(err) => {
            report(&host, &CommandError::from(err));
            bail!("settings are invalid");
        }
    };
    let results = join_all(blocks.iter().map(|block| command.invoke(&host, *block))).await;
    let mut failed = 0usize;
    for result in &results {
        match result {
            Ok(outcome) => println!(
                "{}\t{} line(s) written\tpages {:?}",
                outcome.highlight_id,
                outcome.answer_blocks.len(),
                outcome.pages
            ),
            Err(_) => failed += 1,
        }
    }
    if failed > 0 {
        bail!("{failed} of {} invocation(s) failed", results.len());
    }
    Ok(())
}

async fn load_page_pdf(host: &GraphHost) -> Result<PdfAsset> {
    let raw = host
        .property(PDF_PATH_PROPERTY)
        .ok_or_else(|| anyhow!("{}", CommandError::MissingPdfPath))?;
    let asset = load_pdf_with_annotations(host, &reqwest::Client::new(), &raw).await?;
    Ok(asset)
}

async fn highlights(page: &Path) -> Result<()> {
    let host = open_page(page)?;
    let asset = load_page_pdf(&host).await?;
    for highlight in asset.highlights.iter() {
        let kind = if highlight.is_image() { "image" } else { "text" };
        let preview: String = highlight
            .content
            .text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(PREVIEW_CHARS)
            .collect();
        println!(
            "{}\tpage {}\t{}\t{}",
            highlight.id, highlight.position.page, kind, preview
        );
    }
    Ok(())
}

async fn crop(page: &Path, id: &str, out: &Path) -> Result<()> {
    let host = open_page(page)?;
    let asset = load_page_pdf(&host).await?;
    let highlight = asset
        .highlights
        .find(id)
        .ok_or_else(|| anyhow!("no highlight {id} in {}", asset.location))?;
    let region = extract_highlight_region(Arc::new(DefaultPdfBackend), &asset, highlight).await?;
    fs::write(out, &region.jpeg).with_context(|| format!("failed to write {}", out.display()))?;
    println!(
        "wrote {} ({}x{})",
        out.display(),
        region.width,
        region.height
    );
    Ok(())
}
