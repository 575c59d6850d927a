//! Endpoint health check.

use console::style;

use crate::llm::{OllamaBackend, DEFAULT_CLASSIFY_MODEL};

use super::EndpointArgs;

/// Report whether the server answers and the model is installed.
pub async fn cmd_check(args: &EndpointArgs) -> anyhow::Result<()> {
    let config = args.vlm_config(DEFAULT_CLASSIFY_MODEL);
    let backend = OllamaBackend::new(&config, 1)?;

    let models = match backend.list_models().await {
        Ok(models) => models,
        Err(e) => {
            println!(
                "{} Inference server not reachable at {}: {}",
                style("✗").red(),
                config.endpoint,
                e
            );
            println!("  Make sure Ollama is running: ollama serve");
            anyhow::bail!("inference server unavailable");
        }
    };

    println!(
        "{} Connected to {} ({} installed)",
        style("✓").green(),
        config.endpoint,
        models.len()
    );

    if models.iter().any(|m| model_matches(m, &config.model)) {
        println!("{} Model {} is installed", style("✓").green(), config.model);
    } else {
        println!("{} Model {} is not installed", style("✗").red(), config.model);
        println!("  Pull it with: ollama pull {}", config.model);
    }

    Ok(())
}

/// Ollama lists `name:tag`; an untagged request means `latest`.
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted || (!wanted.contains(':') && installed == format!("{}:latest", wanted))
}
