mod app;
mod cli;

use std::sync::Arc;

use clap::Parser;

use genstudio::cancel::CancellationCoordinator;
use genstudio::config::Config;
use genstudio::provider::ProviderClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // .env next to the binary first, then the working directory.
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|path| path.exists());
    match beside_exe {
        Some(path) => {
            dotenvy::from_path(&path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let args = cli::Args::parse();
    let config = Config::load()?;
    let client = Arc::new(ProviderClient::from_config(&config)?);
    let coordinator = Arc::new(CancellationCoordinator::new());
    app::install_interrupt(coordinator.clone());

    tracing::info!(endpoint = client.endpoint(), "genstudio starting");

    match args.cmd {
        cli::Command::Chat { model } => {
            app::cmd_chat(&config, client, &coordinator, model).await
        }
        cli::Command::Video {
            prompt,
            width,
            height,
            seconds,
        } => {
            app::cmd_video(
                &config,
                client,
                &coordinator,
                &prompt.join(" "),
                width,
                height,
                seconds,
                &args.out,
            )
            .await
        }
        cli::Command::Image {
            prompt,
            size,
            quality,
            style,
        } => {
            app::cmd_image(
                &config,
                client,
                &coordinator,
                &prompt.join(" "),
                size,
                quality,
                style,
                &args.out,
            )
            .await
        }
        cli::Command::Edit { image, prompt } => {
            app::cmd_edit(
                &config,
                client,
                &coordinator,
                &image,
                &prompt.join(" "),
                &args.out,
            )
            .await
        }
    }
}
