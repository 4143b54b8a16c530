use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use genstudio::cancel::CancellationCoordinator;
use genstudio::chat::{ChatSession, Preferences};
use genstudio::config::Config;
use genstudio::job::{GenerationArtifact, VideoGenerationRequest};
use genstudio::orchestrate::Publisher;
use genstudio::orchestrate::image::{ImageOrchestrator, ImageOutcome};
use genstudio::orchestrate::poll::{PollPolicy, PollingOrchestrator, VideoUpdate};
use genstudio::orchestrate::stream::{ChatUpdate, StreamingOrchestrator};
use genstudio::provider::{ImageEditRequest, ImageRequest, ProviderClient};
use genstudio::storage::{FileStore, KeyValueStore};

/// Ctrl-C aborts the running operation; with nothing running it exits.
pub fn install_interrupt(coordinator: Arc<CancellationCoordinator>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if !coordinator.abort() {
                tracing::info!("interrupted with no active operation, exiting");
                std::process::exit(130);
            }
        }
    });
}

pub async fn cmd_chat(
    config: &Config,
    client: Arc<ProviderClient>,
    coordinator: &CancellationCoordinator,
    model_arg: Option<String>,
) -> anyhow::Result<()> {
    let store: Arc<dyn KeyValueStore> =
        Arc::new(FileStore::with_base_dir(config.storage.data_dir.clone()));
    let mut prefs = Preferences::load(store.as_ref()).await;
    let mut session = ChatSession::load(store.clone()).await?;
    let mut orchestrator = StreamingOrchestrator::new(client);

    let mut model = match model_arg.or_else(|| prefs.selected_model.clone()) {
        Some(key) => config.model(&key)?.clone(),
        None => config
            .default_model()
            .cloned()
            .context("no chat models configured")?,
    };
    println!("Chatting with {}. Commands: /reset /export /delete N /model KEY", model.label());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "reset" => {
                    session.reset(None).await?;
                    println!("Conversation reset.");
                }
                "export" => {
                    let path = config.storage.data_dir.join("conversation.md");
                    write_file(&path, session.export_markdown().as_bytes()).await?;
                    println!("Exported to {}", path.display());
                }
                "delete" => match arg.trim().parse::<usize>() {
                    Ok(index) => match session.delete_message(index) {
                        Some(removed) => {
                            session.persist().await?;
                            println!("Deleted {} turn {index}.", removed.role.as_str());
                        }
                        None => println!("No turn {index}."),
                    },
                    Err(_) => println!("Usage: /delete N"),
                },
                "model" => match config.model(arg.trim()) {
                    Ok(entry) => {
                        model = entry.clone();
                        prefs.selected_model = Some(model.key());
                        prefs.save(store.as_ref()).await?;
                        println!("Using {}.", model.label());
                    }
                    Err(e) => println!("{}", e.user_message()),
                },
                _ => println!("Unknown command /{name}"),
            }
            continue;
        }

        let op = coordinator.begin();
        let (updates, mut rx) = Publisher::channel();
        let printer = tokio::spawn(async move {
            let mut out = std::io::stdout();
            while let Some(update) = rx.recv().await {
                if let ChatUpdate::Fragment { text, .. } = update {
                    print!("{text}");
                    out.flush().ok();
                }
            }
        });
        let outcome = orchestrator
            .send(&mut session, line, &model, &op.token, &updates)
            .await;
        coordinator.finish(&op);
        drop(updates);
        printer.await.ok();

        match (outcome.reply.as_deref(), outcome.fragments) {
            (Some(reply), 0) => println!("{reply}"),
            (Some(_), _) => println!(),
            (None, _) if outcome.error.as_ref().is_some_and(|e| e.is_cancelled()) => {
                println!("\n[cancelled]")
            }
            (None, _) => {}
        }
        if let Some(message) = &outcome.message {
            eprintln!("{message}");
        }
    }
    Ok(())
}

pub async fn cmd_video(
    config: &Config,
    client: Arc<ProviderClient>,
    coordinator: &CancellationCoordinator,
    prompt: &str,
    width: u32,
    height: u32,
    seconds: u32,
    out_dir: &Path,
) -> anyhow::Result<()> {
    let request =
        VideoGenerationRequest::new(prompt, width, height, seconds, config.video.model.clone())
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let mut orchestrator = PollingOrchestrator::new(client, PollPolicy::from(&config.video));
    let op = coordinator.begin();
    let (updates, mut rx) = Publisher::channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                VideoUpdate::Submitted { job_id, .. } => println!("Submitted job {job_id}"),
                VideoUpdate::Progress {
                    raw_status,
                    progress,
                    ..
                } => println!("[{progress:>3}%] {raw_status}"),
                VideoUpdate::Retrieving { count } => println!("Downloading {count} video(s)..."),
                _ => {}
            }
        }
    });

    let outcome = orchestrator.run(&request, &op.token, &updates).await;
    coordinator.finish(&op);
    drop(updates);
    printer.await.ok();

    println!("{}", outcome.message);
    if let Some(warning) = &outcome.retrieval_warning {
        eprintln!("{warning}");
    }
    let written = save_artifacts(&outcome.artifacts, out_dir, "generated-video", "mp4").await?;
    for path in written {
        println!("Saved {}", path.display());
    }
    if outcome.is_success() {
        Ok(())
    } else {
        anyhow::bail!("{}", outcome.message)
    }
}

pub async fn cmd_image(
    config: &Config,
    client: Arc<ProviderClient>,
    coordinator: &CancellationCoordinator,
    prompt: &str,
    size: String,
    quality: Option<String>,
    style: Option<String>,
    out_dir: &Path,
) -> anyhow::Result<()> {
    let mut request = ImageRequest::new(config.image.deployment.clone(), prompt);
    request.size = size;
    request.quality = quality;
    request.style = style;

    let mut orchestrator = ImageOrchestrator::new(client);
    let op = coordinator.begin();
    let outcome = orchestrator
        .generate(&request, &op.token, &Publisher::none())
        .await;
    coordinator.finish(&op);
    report_image(outcome, out_dir).await
}

pub async fn cmd_edit(
    config: &Config,
    client: Arc<ProviderClient>,
    coordinator: &CancellationCoordinator,
    image: &Path,
    prompt: &str,
    out_dir: &Path,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("failed to read {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.png".to_string());
    let request = ImageEditRequest {
        model: config.image.deployment.clone(),
        prompt: prompt.to_string(),
        image: bytes,
        file_name,
        mime_type: "image/png".to_string(),
        size: None,
    };

    let mut orchestrator = ImageOrchestrator::new(client);
    let op = coordinator.begin();
    let outcome = orchestrator
        .edit(&request, &op.token, &Publisher::none())
        .await;
    coordinator.finish(&op);
    report_image(outcome, out_dir).await
}

async fn report_image(outcome: ImageOutcome, out_dir: &Path) -> anyhow::Result<()> {
    println!("{}", outcome.message);
    if let Some(revised) = &outcome.revised_prompt {
        println!("Revised prompt: {revised}");
    }
    if let Some(warning) = &outcome.retrieval_warning {
        eprintln!("{warning}");
    }
    if let Some(url) = outcome.artifact.as_ref().and_then(|a| a.url.as_deref()) {
        println!("{url}");
    }
    let artifacts: Vec<GenerationArtifact> = outcome.artifact.iter().cloned().collect();
    for path in save_artifacts(&artifacts, out_dir, "generated-image", "png").await? {
        println!("Saved {}", path.display());
    }
    if outcome.is_success() {
        Ok(())
    } else {
        anyhow::bail!("{}", outcome.message)
    }
}

/// Write each downloaded artifact as `{stem}-{n}.{ext}`, numbered from 1.
async fn save_artifacts(
    artifacts: &[GenerationArtifact],
    out_dir: &Path,
    stem: &str,
    ext: &str,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (i, artifact) in artifacts.iter().enumerate() {
        let Some(bytes) = &artifact.bytes else {
            continue;
        };
        let path = out_dir.join(format!("{stem}-{}.{ext}", i + 1));
        write_file(&path, bytes).await?;
        written.push(path);
    }
    Ok(written)
}

async fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
