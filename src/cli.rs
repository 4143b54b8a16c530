use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chat, video and image generation against an OpenAI-compatible endpoint
#[derive(Debug, Parser)]
#[command(name = "genstudio")]
#[command(version)]
#[command(about = "Generative media studio", long_about = None)]
pub struct Args {
    /// Directory generated files are written to
    #[arg(long = "out", short = 'o', global = true, default_value = ".")]
    pub out: PathBuf,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat; Ctrl-C aborts the reply in progress
    Chat {
        /// Model key ("deployment-hint"); defaults to the saved selection
        #[arg(short = 'm', long = "model")]
        model: Option<String>,
    },

    /// Generate a video and download it
    Video {
        /// Prompt text
        #[arg(value_name = "PROMPT", required = true)]
        prompt: Vec<String>,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
        /// Rounded up to 4, 8 or 12
        #[arg(long, default_value_t = 4)]
        seconds: u32,
    },

    /// Generate an image
    Image {
        #[arg(value_name = "PROMPT", required = true)]
        prompt: Vec<String>,
        #[arg(long, default_value = "1024x1024")]
        size: String,
        /// e.g. "standard" or "hd"
        #[arg(long)]
        quality: Option<String>,
        /// e.g. "vivid" or "natural"
        #[arg(long)]
        style: Option<String>,
    },

    /// Edit an existing image with a prompt
    Edit {
        /// PNG to edit
        image: PathBuf,
        #[arg(value_name = "PROMPT", required = true)]
        prompt: Vec<String>,
    },
}
