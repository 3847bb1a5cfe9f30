use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use askpdf::DEFAULT_CONFIG_FILE;

#[derive(Parser, Debug)]
#[command(name = "askpdf", about = "Explain PDF highlights with answers grounded in the PDF")]
pub struct Cli {
    /// Settings file; missing files fall back to defaults and environment variables.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer the highlights referenced on the given lines of a page.
    Ask {
        page: PathBuf,
        #[arg(long = "line", required = true)]
        lines: Vec<usize>,
    },
    /// List the highlights of the page's pdf.
    Highlights { page: PathBuf },
    /// Write the image of one highlight as JPEG.
    Crop {
        page: PathBuf,
        #[arg(long)]
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the settings schema as JSON.
    SettingsSchema,
}
