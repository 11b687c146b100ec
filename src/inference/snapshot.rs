use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use candle::Device;
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::LoadError;

const TOKENIZER_FILE: &str = "tokenizer.json";
const CONFIG_FILE: &str = "config.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Local paths of everything a candle backend needs to build a model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub tokenizer: PathBuf,
    pub config: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// Resolves `model` either as a local snapshot directory or as a Hugging Face
/// repo id fetched (or read from the hub cache) at `revision`.
pub fn resolve_snapshot(model: &str, revision: &str) -> Result<ModelFiles, LoadError> {
    let local = Path::new(model);
    if local.is_dir() {
        debug!(snapshot = %local.display(), "using local model snapshot");
        return resolve_local(local);
    }
    resolve_hub(model, revision)
}

fn resolve_local(snapshot: &Path) -> Result<ModelFiles, LoadError> {
    let tokenizer = require_file(snapshot, TOKENIZER_FILE)?;
    let config = require_file(snapshot, CONFIG_FILE)?;

    let index = snapshot.join(WEIGHTS_INDEX_FILE);
    let weights = if index.exists() {
        shard_names(&index)?
            .into_iter()
            .map(|name| require_file(snapshot, &name))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![require_file(snapshot, SINGLE_WEIGHTS_FILE)?]
    };

    Ok(ModelFiles {
        tokenizer,
        config,
        weights,
    })
}

fn resolve_hub(model: &str, revision: &str) -> Result<ModelFiles, LoadError> {
    let api = Api::new().map_err(|err| LoadError::Artifacts(format!("hub client: {err}")))?;
    let repo = api.repo(Repo::with_revision(
        model.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));
    let fetch = |file: &str| {
        repo.get(file)
            .map_err(|err| LoadError::Artifacts(format!("{model}@{revision}/{file}: {err}")))
    };

    let tokenizer = fetch(TOKENIZER_FILE)?;
    let config = fetch(CONFIG_FILE)?;

    let weights = match fetch(WEIGHTS_INDEX_FILE) {
        Ok(index) => shard_names(&index)?
            .iter()
            .map(|name| fetch(name.as_str()))
            .collect::<Result<Vec<_>, _>>()?,
        Err(_) => vec![fetch(SINGLE_WEIGHTS_FILE)?],
    };

    Ok(ModelFiles {
        tokenizer,
        config,
        weights,
    })
}

fn require_file(snapshot: &Path, name: &str) -> Result<PathBuf, LoadError> {
    let path = snapshot.join(name);
    if !path.exists() {
        return Err(LoadError::Artifacts(format!(
            "{name} not found under {}",
            snapshot.display()
        )));
    }
    Ok(path)
}

/// Distinct shard file names listed in a safetensors index, in stable order.
fn shard_names(index: &Path) -> Result<BTreeSet<String>, LoadError> {
    let raw: serde_json::Value = read_json(index)?;
    let weight_map = raw["weight_map"].as_object().ok_or_else(|| {
        LoadError::Artifacts(format!("{}: weight_map is not an object", index.display()))
    })?;

    weight_map
        .values()
        .map(|value| {
            value.as_str().map(str::to_string).ok_or_else(|| {
                LoadError::Artifacts(format!("{}: invalid shard entry", index.display()))
            })
        })
        .collect()
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let raw = fs::read(path)
        .map_err(|err| LoadError::Artifacts(format!("failed to read {}: {err}", path.display())))?;
    serde_json::from_slice(&raw)
        .map_err(|err| LoadError::Artifacts(format!("failed to parse {}: {err}", path.display())))
}

/// Maps `cpu`, `cuda`, `cuda:N` or `gpu:N` to a candle device. Anything else
/// falls back to the CPU.
pub fn select_device(preference: &str) -> Result<Device, LoadError> {
    let trimmed = preference.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower.is_empty() || lower == "cpu" {
        Ok(Device::Cpu)
    } else if lower.starts_with("cuda") || lower.starts_with("gpu") {
        let ordinal = trimmed
            .split(':')
            .nth(1)
            .and_then(|part| part.parse::<usize>().ok())
            .unwrap_or(0);
        Device::new_cuda(ordinal).map_err(|err| {
            LoadError::Device(format!("requested CUDA device {ordinal} but initialization failed: {err}"))
        })
    } else {
        warn!(device = trimmed, "unrecognized MODEL_DEVICE value, using cpu");
        Ok(Device::Cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "review-topics-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn local_snapshot_with_single_weights_file() {
        let dir = scratch_dir("single");
        for file in [TOKENIZER_FILE, CONFIG_FILE, SINGLE_WEIGHTS_FILE] {
            fs::write(dir.join(file), b"{}").unwrap();
        }

        let files = resolve_snapshot(dir.to_str().unwrap(), "main").unwrap();
        assert_eq!(files.tokenizer, dir.join(TOKENIZER_FILE));
        assert_eq!(files.weights, vec![dir.join(SINGLE_WEIGHTS_FILE)]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn sharded_index_is_deduplicated() {
        let dir = scratch_dir("sharded");
        fs::write(dir.join(TOKENIZER_FILE), b"{}").unwrap();
        fs::write(dir.join(CONFIG_FILE), b"{}").unwrap();
        fs::write(dir.join("a.safetensors"), b"").unwrap();
        fs::write(dir.join("b.safetensors"), b"").unwrap();
        fs::write(
            dir.join(WEIGHTS_INDEX_FILE),
            br#"{"weight_map":{"x":"b.safetensors","y":"a.safetensors","z":"b.safetensors"}}"#,
        )
        .unwrap();

        let files = resolve_snapshot(dir.to_str().unwrap(), "main").unwrap();
        assert_eq!(
            files.weights,
            vec![dir.join("a.safetensors"), dir.join("b.safetensors")]
        );
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_tokenizer_is_an_artifact_error() {
        let dir = scratch_dir("missing");
        let err = resolve_snapshot(dir.to_str().unwrap(), "main").unwrap_err();
        assert!(matches!(err, LoadError::Artifacts(msg) if msg.contains(TOKENIZER_FILE)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn cpu_and_unknown_preferences_use_cpu() {
        assert!(select_device("cpu").unwrap().is_cpu());
        assert!(select_device(" CPU ").unwrap().is_cpu());
        assert!(select_device("tpu").unwrap().is_cpu());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn cuda_without_support_is_a_device_error() {
        assert!(matches!(select_device("cuda:1"), Err(LoadError::Device(_))));
    }
}
