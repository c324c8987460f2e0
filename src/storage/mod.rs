//! Model persistence
//!
//! Layout under the models directory:
//!
//! ```text
//! <root>/CURRENT                      name of the active generation
//! <root>/<generation>/metadata.json   EnsembleMetadata incl. SHA-256 digests
//! <root>/<generation>/<kind>.json     fitted model + metrics
//! <root>/<generation>/<kind>_scaler.json
//! ```
//!
//! A generation is written into a temporary directory and renamed into place,
//! then `CURRENT` is swapped the same way. Readers therefore only ever see
//! complete generations. Loading is soft: anything missing or incompatible
//! means "untrained" rather than an error, and a member whose files are
//! unreadable or fail their digest check is skipped.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::ml::{EnsembleMetadata, FeatureScaler, FittedModel, MemberArtifact, ModelKind, ModelSet, TrainingMetrics};

const CURRENT_FILE: &str = "CURRENT";
const METADATA_FILE: &str = "metadata.json";
const TMP_PREFIX: &str = ".tmp-";

#[derive(Serialize)]
struct MemberFileRef<'a> {
    kind: ModelKind,
    model: &'a FittedModel,
    metrics: &'a TrainingMetrics,
}

#[derive(Deserialize)]
struct MemberFile {
    kind: ModelKind,
    model: FittedModel,
    metrics: TrainingMetrics,
}

pub fn model_file_name(kind: ModelKind) -> String {
    format!("{}.json", kind.as_str())
}

pub fn scaler_file_name(kind: ModelKind) -> String {
    format!("{}_scaler.json", kind.as_str())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Generational on-disk store for trained model sets
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
    keep_generations: usize,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>, keep_generations: usize) -> Self {
        Self {
            root: root.into(),
            keep_generations: keep_generations.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a model set as a new generation and make it current
    pub fn save(&self, set: &ModelSet) -> Result<String> {
        fs::create_dir_all(&self.root)?;

        let generation = self.next_generation_id()?;
        let tmp_dir = self.root.join(format!("{TMP_PREFIX}{generation}"));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let result = self.write_generation(&tmp_dir, set).and_then(|()| {
            fs::rename(&tmp_dir, self.root.join(&generation))?;
            Ok(())
        });
        if let Err(e) = result {
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(EngineError::Persistence(format!("writing generation {generation}: {e}")));
        }

        self.write_current(&generation)
            .map_err(|e| EngineError::Persistence(format!("updating {CURRENT_FILE}: {e}")))?;

        if let Err(e) = self.prune(&generation) {
            warn!("Failed to prune old model generations: {}", e);
        }

        info!("Saved {} models as generation {}", set.members.len(), generation);
        Ok(generation)
    }

    fn write_generation(&self, dir: &Path, set: &ModelSet) -> Result<()> {
        let mut digests = BTreeMap::new();

        for member in &set.members {
            let model_name = model_file_name(member.kind);
            let model_bytes = serde_json::to_vec(&MemberFileRef {
                kind: member.kind,
                model: &member.model,
                metrics: &member.metrics,
            })?;
            fs::write(dir.join(&model_name), &model_bytes)?;
            digests.insert(model_name, sha256_hex(&model_bytes));

            let scaler_name = scaler_file_name(member.kind);
            let scaler_bytes = serde_json::to_vec(&member.scaler)?;
            fs::write(dir.join(&scaler_name), &scaler_bytes)?;
            digests.insert(scaler_name, sha256_hex(&scaler_bytes));
        }

        let metadata = EnsembleMetadata {
            members: set.members.iter().map(|m| m.kind).collect(),
            artifact_digests: digests,
            ..set.metadata.clone()
        };
        fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?)?;
        Ok(())
    }

    fn write_current(&self, generation: &str) -> Result<()> {
        let tmp = self.root.join(format!("{TMP_PREFIX}{CURRENT_FILE}"));
        fs::write(&tmp, generation)?;
        fs::rename(&tmp, self.root.join(CURRENT_FILE))?;
        Ok(())
    }

    /// `gen-<sequence>-<timestamp>`; the sequence keeps names ordered
    fn next_generation_id(&self) -> Result<String> {
        let last = self
            .generations()?
            .iter()
            .filter_map(|name| name.split('-').nth(1)?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(format!("gen-{:06}-{}", last + 1, Utc::now().format("%Y%m%dT%H%M%SZ")))
    }

    /// Name of the active generation, if any
    pub fn current_generation(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.root.join(CURRENT_FILE)) {
            Ok(s) => {
                let name = s.trim().to_string();
                Ok(if name.is_empty() { None } else { Some(name) })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Completed generations, oldest first
    pub fn generations(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("gen-") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn prune(&self, current: &str) -> Result<()> {
        let generations = self.generations()?;
        if generations.len() <= self.keep_generations {
            return Ok(());
        }
        let excess = generations.len() - self.keep_generations;
        for name in generations.iter().take(excess).filter(|n| n.as_str() != current) {
            debug!("Pruning model generation {}", name);
            fs::remove_dir_all(self.root.join(name))?;
        }
        Ok(())
    }

    /// Load the active generation; `Ok(None)` when there is nothing usable
    pub fn load(&self) -> Result<Option<ModelSet>> {
        let Some(generation) = self.current_generation()? else {
            debug!("No current model generation in {}", self.root.display());
            return Ok(None);
        };
        let dir = self.root.join(&generation);

        let metadata: EnsembleMetadata = match fs::read(dir.join(METADATA_FILE)) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Unreadable metadata in generation {}: {}", generation, e);
                    return Ok(None);
                }
            },
            Err(e) => {
                warn!("Missing metadata for generation {}: {}", generation, e);
                return Ok(None);
            }
        };

        if !metadata.is_compatible() {
            warn!(
                "Generation {} is incompatible (version {}, {} feature columns), ignoring",
                generation,
                metadata.model_version,
                metadata.feature_columns.len()
            );
            return Ok(None);
        }

        let mut members = Vec::new();
        for &kind in &metadata.members {
            match self.load_member(&dir, kind, &metadata.artifact_digests) {
                Ok(member) => members.push(member),
                Err(e) => warn!("Skipping model {} from generation {}: {}", kind, generation, e),
            }
        }

        if members.is_empty() {
            warn!("Generation {} has no loadable models", generation);
            return Ok(None);
        }

        info!("Loaded {} models from generation {}", members.len(), generation);
        let metadata = EnsembleMetadata {
            members: members.iter().map(|m| m.kind).collect(),
            ..metadata
        };
        Ok(Some(ModelSet { members, metadata }))
    }

    fn load_member(&self, dir: &Path, kind: ModelKind, digests: &BTreeMap<String, String>) -> Result<MemberArtifact> {
        let read_verified = |name: String| -> Result<Vec<u8>> {
            let bytes = fs::read(dir.join(&name))?;
            if let Some(expected) = digests.get(&name) {
                let actual = sha256_hex(&bytes);
                if &actual != expected {
                    return Err(EngineError::CorruptModel(format!("{name}: digest mismatch")));
                }
            }
            Ok(bytes)
        };

        let file: MemberFile = serde_json::from_slice(&read_verified(model_file_name(kind))?)?;
        let scaler: FeatureScaler = serde_json::from_slice(&read_verified(scaler_file_name(kind))?)?;

        if file.kind != kind || file.model.kind() != kind {
            return Err(EngineError::CorruptModel(format!(
                "{} holds a {} model",
                model_file_name(kind),
                file.model.kind()
            )));
        }
        if scaler.kind() != kind.scaler_kind() {
            return Err(EngineError::CorruptModel(format!("unexpected scaler for {kind}")));
        }

        Ok(MemberArtifact {
            kind,
            model: file.model,
            scaler,
            metrics: file.metrics,
        })
    }
}
