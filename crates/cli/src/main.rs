mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use pixio_client::api::{GenerationApi, PixioApi};
use pixio_client::config::ClientConfig;
use pixio_client::download::save_artifact;
use pixio_client::launcher::{JobLauncher, TrackedJob};
use pixio_client::tracker::JobTracker;
use pixio_client::upload::read_upload_file;
use pixio_core::credits::CreditLedger;
use pixio_core::job::{Job, JobPhase};
use pixio_core::presenter::present;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixio=info,pixio_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("Failed to load configuration")?;
    if let Some(credits) = cli.credits {
        config.starting_credits = credits;
    }

    let api: Arc<dyn GenerationApi> =
        Arc::new(PixioApi::new(&config).context("Failed to build HTTP client")?);
    let tracker = JobTracker::new(Arc::clone(&api), config.poll.clone());
    let ledger = CreditLedger::new(config.starting_credits);
    let launcher = JobLauncher::new(Arc::clone(&api), Arc::clone(&tracker), Arc::clone(&ledger));

    tracing::info!(api_url = %config.api_url, credits = ledger.available(), "pixio starting");

    let mut upload_status = launcher.upload_status();
    let status_printer = tokio::spawn(async move {
        while upload_status.changed().await.is_ok() {
            if let Some(text) = upload_status.borrow_and_update().clone() {
                println!("{text}");
            }
        }
    });

    let launch = match cli.command {
        Command::Txt2img { positive, negative } => {
            launcher.launch_text_to_image(positive, negative).await
        }
        Command::Img2img { file } => {
            let file = read_upload_file(&file).await?;
            launcher.launch_image_to_image(file).await
        }
        Command::Pose { prompt, pose } => launcher.launch_pose_guided(pose, prompt).await,
    };
    let launch = launch.context("Launch failed")?;
    for failure in &launch.failures {
        println!("One submission failed: {}", present(failure));
    }
    println!(
        "Launched {} job(s) for {} credits, {} left",
        launch.jobs.len(),
        launch.charged,
        ledger.available()
    );

    let finished = tokio::select! {
        jobs = join_all(launch.jobs.into_iter().map(follow)) => jobs,
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted, cancelling tracked jobs");
            tracker.shutdown().await;
            Vec::new()
        }
    };

    let mut succeeded = 0;
    for (job_id, job) in &finished {
        if job.phase != JobPhase::Success {
            continue;
        }
        succeeded += 1;
        if cli.no_download {
            continue;
        }
        if let Some(url) = job.primary_output() {
            let saved = save_artifact(api.as_ref(), url, &cli.out_dir, Some(job_id.as_str())).await;
            if let Some(path) = saved {
                println!("[{job_id}] saved to {}", path.display());
            }
        }
    }

    status_printer.abort();
    tracker.shutdown().await;
    println!("Credits remaining: {}", ledger.available());

    if succeeded == 0 {
        anyhow::bail!("No image was generated");
    }
    Ok(())
}

/// Print presentation changes of one job until it is terminal.
async fn follow(mut job: TrackedJob) -> (String, Job) {
    let id = job.job_id.to_string();
    let mut last = None;
    loop {
        let snapshot = job.updates.borrow_and_update().clone();
        let presentation = present(&snapshot);
        if last.as_ref() != Some(&presentation) {
            println!("[{id}] {presentation}");
            last = Some(presentation);
        }
        if snapshot.phase.is_terminal() {
            return (id, snapshot);
        }
        if job.updates.changed().await.is_err() {
            let snapshot = job.updates.borrow().clone();
            return (id, snapshot);
        }
    }
}
