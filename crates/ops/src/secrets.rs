// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret decryption via a sops-compatible tool.
//!
//! Preconditions are checked in a fixed order so operators get the
//! precise missing piece: tool on PATH, file present, file is a YAML
//! mapping, mapping carries sops metadata, an age key is reachable.
//! Only then is the tool spawned. Its stderr is sanitized before it can
//! appear in any error a caller might log or forward.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use keel_core::{deep_merge, truncate_bytes};

use crate::subprocess::{run_with_timeout, CmdError};

/// Env var holding an age key inline.
const AGE_KEY_ENV: &str = "SOPS_AGE_KEY";
/// Env var pointing at an age key file.
const AGE_KEY_FILE_ENV: &str = "SOPS_AGE_KEY_FILE";

// Lines of decryptor stderr that must never reach callers.
#[allow(clippy::expect_used)]
static SENSITIVE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)data key|decrypted|plaintext|secret").expect("constant regex pattern is valid")
});

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("decryption tool {tool:?} not found on PATH")]
    ToolMissing { tool: String },

    #[error("secret file not found: {path}")]
    FileMissing { path: PathBuf },

    #[error("secret file is not a YAML mapping: {path}")]
    NotAMapping { path: PathBuf },

    #[error("secret file has no sops metadata, it is not encrypted: {path}")]
    NotEncrypted { path: PathBuf },

    #[error(
        "no age key available: set {AGE_KEY_ENV}, point {AGE_KEY_FILE_ENV} at a key file, \
         or create {default_path}"
    )]
    KeyMissing { default_path: PathBuf },

    #[error("decrypt failed for {path}: {stderr}")]
    DecryptFailed { path: PathBuf, stderr: String },

    #[error("decrypted output for {path} is not valid JSON: {source}")]
    BadJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Cmd(#[from] CmdError),
}

/// Drop sensitive lines from decryptor stderr and cap at 500 bytes.
pub fn sanitize_stderr(raw: &str) -> String {
    let kept: Vec<&str> = raw.lines().filter(|line| !SENSITIVE_LINE.is_match(line)).collect();
    let joined = kept.join("\n");
    truncate_bytes(&joined, 500).to_string()
}

/// Handle on the external decryptor.
#[derive(Debug, Clone)]
pub struct Decryptor {
    tool: String,
    age_key_default: PathBuf,
    timeout: Duration,
}

impl Decryptor {
    pub fn new(tool: impl Into<String>, age_key_default: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            age_key_default: age_key_default.into(),
            timeout: Duration::from_secs(30),
        }
    }

    fn tool_on_path(&self) -> bool {
        // An explicit path bypasses the PATH walk.
        if self.tool.contains('/') {
            return Path::new(&self.tool).is_file();
        }
        let Some(path_var) = std::env::var_os("PATH") else { return false };
        std::env::split_paths(&path_var).any(|dir| dir.join(&self.tool).is_file())
    }

    fn age_key_available(&self) -> bool {
        if std::env::var(AGE_KEY_ENV).map(|v| !v.is_empty()).unwrap_or(false) {
            return true;
        }
        if let Ok(key_file) = std::env::var(AGE_KEY_FILE_ENV) {
            if Path::new(&key_file).is_file() {
                return true;
            }
        }
        self.age_key_default.is_file()
    }

    fn check_preconditions(&self, path: &Path) -> Result<(), SecretsError> {
        if !self.tool_on_path() {
            return Err(SecretsError::ToolMissing { tool: self.tool.clone() });
        }
        if !path.is_file() {
            return Err(SecretsError::FileMissing { path: path.to_path_buf() });
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|_| SecretsError::FileMissing { path: path.to_path_buf() })?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&raw)
            .map_err(|_| SecretsError::NotAMapping { path: path.to_path_buf() })?;
        let Some(mapping) = doc.as_mapping() else {
            return Err(SecretsError::NotAMapping { path: path.to_path_buf() });
        };
        let sops_key = serde_yaml::Value::String("sops".to_string());
        if !mapping.contains_key(&sops_key) {
            return Err(SecretsError::NotEncrypted { path: path.to_path_buf() });
        }
        if !self.age_key_available() {
            return Err(SecretsError::KeyMissing { default_path: self.age_key_default.clone() });
        }
        Ok(())
    }

    /// Decrypt one file to raw JSON bytes.
    pub async fn decrypt_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SecretsError> {
        self.check_preconditions(path)?;

        let mut cmd = Command::new(&self.tool);
        cmd.arg("--decrypt").arg("--output-type").arg("json").arg(path);
        let out = run_with_timeout(&mut cmd, &self.tool, self.timeout, cancel).await?;
        if !out.success {
            return Err(SecretsError::DecryptFailed {
                path: path.to_path_buf(),
                stderr: sanitize_stderr(&out.stderr),
            });
        }
        debug!(path = %path.display(), "decrypted secret file");
        Ok(out.stdout.into_bytes())
    }

    /// Decrypt one file and parse the JSON document.
    pub async fn decrypt_to_map(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Value, SecretsError> {
        let bytes = self.decrypt_file(path, cancel).await?;
        serde_json::from_slice(&bytes)
            .map_err(|source| SecretsError::BadJson { path: path.to_path_buf(), source })
    }

    /// Decrypt several files and deep-merge them in order: later files
    /// win on collisions, nested maps merge recursively.
    pub async fn decrypt_files(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<Value, SecretsError> {
        let mut merged = Value::Object(serde_json::Map::new());
        for path in paths {
            let next = self.decrypt_to_map(path, cancel).await?;
            merged = deep_merge(merged, next);
        }
        Ok(merged)
    }
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
