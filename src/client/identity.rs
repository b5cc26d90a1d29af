//! Client-held identities, one per joined session

use crate::model::Participant;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityFile {
    #[serde(default)]
    sessions: BTreeMap<String, Participant>,
}

/// TOML file mapping session ids to the participant this client plays
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store kept as `identities.toml` inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("identities.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity for a session, if this client joined it
    pub fn get(&self, session_id: &str) -> Result<Option<Participant>> {
        Ok(self.read()?.sessions.remove(session_id))
    }

    /// Remember the identity used for a session
    ///
    /// The file is replaced by rename, so readers see the old or the new
    /// contents and never a partial write.
    pub fn save(&self, session_id: &str, participant: &Participant) -> Result<()> {
        let mut file = self.read()?;
        file.sessions
            .insert(session_id.to_string(), participant.clone());
        let content = toml::to_string(&file)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut staged = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to stage {}", self.path.display()))?;
        staged.write_all(content.as_bytes())?;
        staged.as_file().sync_all()?;
        staged
            .persist(&self.path)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn read(&self) -> Result<IdentityFile> {
        if !self.path.exists() {
            return Ok(IdentityFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        toml::from_str(&content).with_context(|| format!("Corrupt identity file {}", self.path.display()))
    }
}
