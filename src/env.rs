//! Environment constants and path utilities for the task planner.
//!
//! This module centralizes the directory and file names used for
//! configuration discovery and model checkpoints.

use std::path::{Path, PathBuf};

/// Planner directory name (hidden directory like .git, .vscode)
pub const TASKPLAN_DIR_NAME: &str = ".taskplan";

/// Configuration file name inside a planner directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Stand-alone configuration file name in a project root
pub const PROJECT_CONFIG_FILE_NAME: &str = "taskplan.toml";

/// System-wide configuration directory (Unix-like systems)
pub const SYSTEM_CONFIG_DIR: &str = "/etc/taskplan";

/// Model checkpoint directory and file names
pub mod checkpoint {
    /// Models directory name within .taskplan
    pub const MODELS_DIR_NAME: &str = "models";

    /// Plain JSON checkpoint file name
    pub const MODEL_FILE_NAME: &str = "models.json";

    /// Gzip-compressed checkpoint file name
    pub const COMPRESSED_MODEL_FILE_NAME: &str = "models.json.gz";

    /// Prefix for in-flight checkpoint writes
    pub const TEMP_FILE_PREFIX: &str = ".models.tmp";
}

/// Build the .taskplan directory path from a workspace root
pub fn taskplan_dir_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(TASKPLAN_DIR_NAME)
}

/// Build the model checkpoint directory path
pub fn models_dir_path(workspace_root: &Path) -> PathBuf {
    taskplan_dir_path(workspace_root).join(checkpoint::MODELS_DIR_NAME)
}

/// Build the checkpoint file path inside a checkpoint directory
pub fn model_checkpoint_file_path(checkpoint_dir: &Path, compressed: bool) -> PathBuf {
    if compressed {
        checkpoint_dir.join(checkpoint::COMPRESSED_MODEL_FILE_NAME)
    } else {
        checkpoint_dir.join(checkpoint::MODEL_FILE_NAME)
    }
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(TASKPLAN_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    taskplan_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

/// Build the stand-alone project config file path
pub fn project_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(PROJECT_CONFIG_FILE_NAME)
}

/// Build the system-wide config file path
pub fn system_config_file_path() -> PathBuf {
    Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)
}
