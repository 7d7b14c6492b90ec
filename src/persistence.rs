use crate::env;
use crate::scheduler::predictor::PredictionModel;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Format version written into every checkpoint
pub const CHECKPOINT_VERSION: u32 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Configuration for model checkpointing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    pub checkpoint_dir: PathBuf,
    /// Seconds between periodic checkpoints; 0 disables the loop
    pub checkpoint_interval_secs: u64,
    pub enable_compression: bool,
}

/// Snapshot of every learned prediction model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCheckpoint {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub models: Vec<PredictionModel>,
}

/// Result of a checkpoint write
#[derive(Debug)]
pub struct CheckpointResult {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub model_count: usize,
    pub compression_ratio: Option<f64>,
}

/// Reads and writes prediction model checkpoints
pub struct ModelStore {
    config: PersistenceConfig,
}

impl ModelStore {
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Location of the checkpoint for the current compression setting
    pub fn checkpoint_path(&self) -> PathBuf {
        env::model_checkpoint_file_path(&self.config.checkpoint_dir, self.config.enable_compression)
    }

    /// Location of the checkpoint written with the opposite compression setting
    fn alternate_checkpoint_path(&self) -> PathBuf {
        env::model_checkpoint_file_path(&self.config.checkpoint_dir, !self.config.enable_compression)
    }

    /// Write the models atomically: serialize to a temp file, then rename over the old checkpoint
    pub async fn save(&self, models: Vec<PredictionModel>) -> Result<CheckpointResult> {
        async_fs::create_dir_all(&self.config.checkpoint_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create checkpoint directory: {}",
                    self.config.checkpoint_dir.display()
                )
            })?;

        let checkpoint = ModelCheckpoint {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            models,
        };
        let serialized =
            serde_json::to_vec_pretty(&checkpoint).context("Failed to serialize model checkpoint")?;

        let (final_data, compression_ratio) = if self.config.enable_compression {
            let compressed = compress_data(&serialized)?;
            let ratio = serialized.len() as f64 / compressed.len().max(1) as f64;
            (compressed, Some(ratio))
        } else {
            (serialized, None)
        };

        let final_path = self.checkpoint_path();
        let temp_path = self.config.checkpoint_dir.join(format!(
            "{}.{}",
            env::checkpoint::TEMP_FILE_PREFIX,
            uuid::Uuid::new_v4()
        ));

        if let Err(err) = write_synced(&temp_path, &final_data).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(err);
        }
        async_fs::rename(&temp_path, &final_path)
            .await
            .with_context(|| format!("Failed to commit checkpoint to {}", final_path.display()))?;

        let stale = self.alternate_checkpoint_path();
        match async_fs::remove_file(&stale).await {
            Ok(()) => debug!("Removed superseded checkpoint {}", stale.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Failed to remove superseded checkpoint {}: {}",
                stale.display(),
                err
            ),
        }

        info!(
            "Saved {} prediction models to {} ({} bytes)",
            checkpoint.models.len(),
            final_path.display(),
            final_data.len()
        );

        Ok(CheckpointResult {
            path: final_path,
            bytes_written: final_data.len() as u64,
            model_count: checkpoint.models.len(),
            compression_ratio,
        })
    }

    /// Load the most recent checkpoint; `None` when nothing has been saved yet.
    ///
    /// Both the plain and the gzip file are considered so toggling compression
    /// does not lose learned state. When both exist the newer one wins.
    pub async fn load(&self) -> Result<Option<ModelCheckpoint>> {
        let dir = &self.config.checkpoint_dir;
        let preferred = self.checkpoint_path();
        let alternate = self.alternate_checkpoint_path();

        let path = match (modified_at(&preferred).await, modified_at(&alternate).await) {
            (Some(own), Some(other)) if other > own => {
                debug!("Using newer checkpoint {} written with other settings", alternate.display());
                alternate
            }
            (Some(_), _) => preferred,
            (None, Some(_)) => {
                debug!("Using checkpoint {} written with other settings", alternate.display());
                alternate
            }
            (None, None) => {
                debug!("No model checkpoint found in {}", dir.display());
                return Ok(None);
            }
        };

        let content = async_fs::read(&path)
            .await
            .with_context(|| format!("Failed to read checkpoint file: {}", path.display()))?;

        let decompressed = if content.starts_with(&GZIP_MAGIC) {
            decompress_data(&content)?
        } else {
            content
        };

        let checkpoint: ModelCheckpoint = serde_json::from_slice(&decompressed)
            .with_context(|| format!("Failed to deserialize checkpoint: {}", path.display()))?;

        if checkpoint.version > CHECKPOINT_VERSION {
            anyhow::bail!(
                "Checkpoint version {} is newer than supported version {}",
                checkpoint.version,
                CHECKPOINT_VERSION
            );
        }
        if checkpoint.version < CHECKPOINT_VERSION {
            warn!(
                "Loading checkpoint written by older version {}",
                checkpoint.version
            );
        }

        info!(
            "Loaded {} prediction models saved at {}",
            checkpoint.models.len(),
            checkpoint.saved_at
        );
        Ok(Some(checkpoint))
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: env::models_dir_path(Path::new(".")),
            checkpoint_interval_secs: 300,
            enable_compression: false,
        }
    }
}

/// Modification time of `path`, or `None` when it does not exist
async fn modified_at(path: &Path) -> Option<std::time::SystemTime> {
    let metadata = async_fs::metadata(path).await.ok()?;
    metadata.modified().ok().or(Some(std::time::UNIX_EPOCH))
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = async_fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create checkpoint file: {}", path.display()))?;
    file.write_all(data)
        .await
        .context("Failed to write checkpoint data")?;
    file.sync_all()
        .await
        .context("Failed to sync checkpoint file")?;
    Ok(())
}

fn compress_data(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .context("Failed to compress checkpoint")?;
    encoder.finish().context("Failed to finish checkpoint compression")
}

fn decompress_data(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .context("Failed to decompress checkpoint")?;
    Ok(decompressed)
}
