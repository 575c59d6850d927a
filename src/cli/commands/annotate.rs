//! Annotation commands: classify, impact, damage.

use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::llm::{InferenceClient, OllamaBackend};
use crate::services::annotation::{AnnotationEvent, AnnotationManager, TaskKind};

use super::super::helpers::{plural, truncate};
use super::RunArgs;

/// Run one annotation task over a CSV file.
pub async fn cmd_annotate(task: TaskKind, args: &RunArgs) -> anyhow::Result<()> {
    let annotator = task.annotator();
    let config = args.run_config(task);
    let vlm_config = args.endpoint.vlm_config(task.default_model());

    let backend = OllamaBackend::new(&vlm_config, config.max_concurrent)?;
    if !backend.is_available().await {
        println!(
            "{} Inference server not available at {}",
            style("✗").red(),
            vlm_config.endpoint
        );
        println!("  Make sure Ollama is running: ollama serve");
        anyhow::bail!("inference server unavailable");
    }

    println!(
        "{} Connected to {} (model: {})",
        style("✓").green(),
        vlm_config.endpoint,
        vlm_config.model
    );
    println!(
        "{} {}: {} → {} (max {} concurrent)",
        style("→").cyan(),
        annotator.display_name(),
        args.input.display(),
        config.output.display(),
        config.max_concurrent
    );

    let client = InferenceClient::new(
        Arc::new(backend),
        vlm_config.retry.clone(),
        config.max_concurrent,
    );
    let manager = AnnotationManager::new(client, &vlm_config.model)
        .with_warm_up_timeout(vlm_config.warm_up_timeout());

    let (event_tx, event_rx) = mpsc::channel::<AnnotationEvent>(100);
    let event_handler = tokio::spawn(render_events(event_rx));

    let result = manager.run(annotator, &args.input, &config, event_tx).await;

    // Wait for event handler to finish
    let _ = event_handler.await;

    let result = result?;
    println!(
        "{} Wrote {}",
        style("✓").green(),
        result.output.display()
    );
    Ok(())
}

fn progress_bar(len: usize) -> ProgressBar {
    let progress = ProgressBar::new(len as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    progress.set_message("Annotating...");
    progress
}

/// Print above the bar when one is active.
fn say(progress: &Option<ProgressBar>, line: String) {
    match progress {
        Some(progress) => progress.println(line),
        None => println!("{}", line),
    }
}

async fn render_events(mut event_rx: mpsc::Receiver<AnnotationEvent>) {
    let mut progress: Option<ProgressBar> = None;

    while let Some(event) = event_rx.recv().await {
        match event {
            AnnotationEvent::Started {
                total_rows,
                pending,
                skipped,
                healed,
                defaulted,
            } => {
                println!(
                    "{} {} selected: {} pending, {} already complete, {} without evidence",
                    style("→").cyan(),
                    plural(total_rows, "row"),
                    pending,
                    skipped,
                    defaulted
                );
                if healed > 0 {
                    println!(
                        "  {} {} had a stored error and will be retried",
                        style("!").yellow(),
                        plural(healed, "row")
                    );
                }
                if pending > 0 {
                    progress = Some(progress_bar(pending));
                }
            }
            AnnotationEvent::WarmingUp { model } => {
                if let Some(ref progress) = progress {
                    progress.set_message(format!("Warming up {}...", model));
                }
            }
            AnnotationEvent::WarmUpFailed { error } => {
                say(
                    &progress,
                    format!(
                        "{} Warm-up failed, continuing: {}",
                        style("!").yellow(),
                        truncate(&error, 100)
                    ),
                );
            }
            AnnotationEvent::RowCompleted { row, summary } => {
                if let Some(ref progress) = progress {
                    progress.set_message(truncate(&format!("row {}: {}", row, summary), 60));
                    progress.inc(1);
                }
            }
            AnnotationEvent::RowFailed { row, error } => {
                say(
                    &progress,
                    format!("{} row {}: {}", style("✗").red(), row, truncate(&error, 100)),
                );
                if let Some(ref progress) = progress {
                    progress.inc(1);
                }
            }
            AnnotationEvent::Checkpoint { completed, pending } => {
                say(
                    &progress,
                    format!(
                        "  {} Checkpoint: {} completed, {} remaining",
                        style("→").dim(),
                        completed,
                        pending
                    ),
                );
            }
            AnnotationEvent::Complete {
                succeeded,
                failed,
                skipped,
                defaulted,
                flagged,
            } => {
                if let Some(progress) = progress.take() {
                    progress.finish_and_clear();
                }

                println!(
                    "{} Annotation complete: {} succeeded, {} failed, {} skipped, {} without evidence",
                    style("✓").green(),
                    succeeded,
                    failed,
                    skipped,
                    defaulted
                );
                if let Some(flagged) = flagged {
                    println!("  {} {} flagged in table", style("→").dim(), plural(flagged, "row"));
                }
                if failed > 0 {
                    println!(
                        "  {} Re-run the same command to retry {}",
                        style("→").dim(),
                        plural(failed, "failed row")
                    );
                }
            }
        }
    }
}
