use std::{env, fs};

use anyhow::{Context, Result};
use hf_hub::{api::sync::Api, Repo};
use tracing::info;

use review_topics::{config::Settings, logging::init_tracing};

const DEFAULT_REPO: &str = "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF";
const DEFAULT_FILE: &str = "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf";

/// Fetches a GGUF file from the Hugging Face hub into `MODEL_PATH`.
///
/// Usage: `download-model [repo-id] [file-name]`
fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;
    init_tracing(settings.log_filter());

    let mut args = env::args().skip(1);
    let repo_id = args.next().unwrap_or_else(|| DEFAULT_REPO.to_string());
    let file = args.next().unwrap_or_else(|| DEFAULT_FILE.to_string());
    let target = settings.model_path;

    if target.exists() {
        info!(path = %target.display(), "model already present, nothing to do");
        return Ok(());
    }

    info!(repo = %repo_id, file = %file, "downloading model");
    let cached = Api::new()
        .context("failed to create hub client")?
        .repo(Repo::model(repo_id.clone()))
        .get(&file)
        .with_context(|| format!("failed to fetch {repo_id}/{file}"))?;

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::copy(&cached, &target).with_context(|| {
        format!("failed to copy {} to {}", cached.display(), target.display())
    })?;

    info!(path = %target.display(), "model saved");
    Ok(())
}
