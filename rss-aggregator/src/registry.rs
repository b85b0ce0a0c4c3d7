use crate::types::{AggregatorError, FeedSource, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The ordered list of feeds a user wants in their newspaper.
///
/// Backed by a JSON array on disk. Validation happens here, at load and edit
/// time, so a pipeline run can take `list_sources()` at face value.
pub struct FeedRegistry {
    path: PathBuf,
    sources: Vec<FeedSource>,
}

impl FeedRegistry {
    /// Load the registry. A missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No feed registry at {}, starting empty", path.display());
            return Ok(Self {
                path: path.to_path_buf(),
                sources: Vec::new(),
            });
        }

        let raw = std::fs::read_to_string(path)?;
        let sources: Vec<FeedSource> = serde_json::from_str(&raw)
            .map_err(|e| AggregatorError::Config(format!("invalid feed registry {}: {}", path.display(), e)))?;

        let mut seen = HashSet::new();
        for source in &sources {
            validate_identifier(&source.identifier)?;
            if !seen.insert(source.identifier.as_str()) {
                return Err(AggregatorError::Config(format!(
                    "duplicate feed identifier in registry: {}",
                    source.identifier
                )));
            }
        }

        info!("Loaded {} feeds from {}", sources.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            sources,
        })
    }

    pub fn list_sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn get(&self, identifier: &str) -> Option<&FeedSource> {
        self.sources.iter().find(|s| s.identifier == identifier)
    }

    pub fn add_source(&mut self, source: FeedSource) -> Result<()> {
        validate_identifier(&source.identifier)?;
        if self.get(&source.identifier).is_some() {
            return Err(AggregatorError::Config(format!(
                "feed already registered: {}",
                source.identifier
            )));
        }
        info!("Added feed {}", source.identifier);
        self.sources.push(source);
        Ok(())
    }

    /// Returns whether a feed was removed.
    pub fn remove_source(&mut self, identifier: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.identifier != identifier);
        let removed = self.sources.len() != before;
        if removed {
            info!("Removed feed {}", identifier);
        }
        removed
    }

    /// Replace the feed registered under `identifier`, keeping its position.
    pub fn update_source(&mut self, identifier: &str, source: FeedSource) -> Result<()> {
        validate_identifier(&source.identifier)?;
        if source.identifier != identifier && self.get(&source.identifier).is_some() {
            return Err(AggregatorError::Config(format!(
                "feed already registered: {}",
                source.identifier
            )));
        }
        let slot = self
            .sources
            .iter_mut()
            .find(|s| s.identifier == identifier)
            .ok_or_else(|| AggregatorError::Config(format!("no feed registered as {}", identifier)))?;
        *slot = source;
        info!("Updated feed {}", identifier);
        Ok(())
    }

    /// Write the registry back, replacing the file in one rename.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.sources)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        info!("Saved {} feeds to {}", self.sources.len(), self.path.display());
        Ok(())
    }
}

fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.trim().is_empty() {
        return Err(AggregatorError::Config("feed identifier must not be empty".to_string()));
    }
    Ok(())
}
