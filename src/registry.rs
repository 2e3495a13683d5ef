/*!
 # Lighthouse registry

 The addresses of the user's lighthouses are kept in a small JSON file so
 that `power` and `exec` can run without naming them every time:

 ```json
 {"Lighthouses":["AA:BB:CC:DD:EE:01","AA:BB:CC:DD:EE:02"]}
 ```
*/

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::LighthouseAddress;

/// Directory under the local data directory holding the registry and logs
pub const APP_DIR_NAME: &str = "lighthouse-power";

const REGISTRY_FILE_NAME: &str = "lighthouses.json";

/// Errors produced while reading or writing the registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Lighthouse registry does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("Lighthouse registry is not valid JSON: {}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Lighthouse registry is missing the `Lighthouses` array: {}", .0.display())]
    MissingLighthouses(PathBuf),

    #[error("Lighthouse registry lists no lighthouses: {}", .0.display())]
    Empty(PathBuf),

    #[error("Failed to create registry directory {}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to access lighthouse registry {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// On-disk shape; `Lighthouses` may be absent or null in hand-edited files
#[derive(Deserialize)]
struct RegistryFile {
    #[serde(rename = "Lighthouses", default)]
    lighthouses: Option<Vec<LighthouseAddress>>,
}

/// Lenient on-disk shape used to keep the valid entries of a damaged file
#[derive(Deserialize)]
struct RawRegistryFile {
    #[serde(rename = "Lighthouses", default)]
    lighthouses: Option<Vec<String>>,
}

/// Registered lighthouse addresses, in registration order and without repeats
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Registry {
    #[serde(rename = "Lighthouses")]
    lighthouses: Vec<LighthouseAddress>,
}

impl Registry {
    /// `<local data dir>/lighthouse-power/lighthouses.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join(APP_DIR_NAME).join(REGISTRY_FILE_NAME))
    }

    pub fn lighthouses(&self) -> &[LighthouseAddress] {
        &self.lighthouses
    }

    /// Reads a registry that must list at least one lighthouse
    #[instrument]
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Err(RegistryError::Missing(path.to_path_buf()));
        }

        let json = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if json.trim().is_empty() {
            return Err(RegistryError::MissingLighthouses(path.to_path_buf()));
        }

        let file: RegistryFile =
            serde_json::from_str(&json).map_err(|source| RegistryError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        let Some(lighthouses) = file.lighthouses else {
            return Err(RegistryError::MissingLighthouses(path.to_path_buf()));
        };
        if lighthouses.is_empty() {
            return Err(RegistryError::Empty(path.to_path_buf()));
        }

        let mut registry = Self::default();
        registry.register(lighthouses);
        debug!("Loaded {} lighthouses", registry.lighthouses.len());
        Ok(registry)
    }

    /// Reads the registry for updating.
    ///
    /// Entries that are not valid addresses are dropped with a warning; only
    /// a file that cannot be read as a registry at all starts a fresh one.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(registry) => registry,
            Err(RegistryError::Missing(_)) | Err(RegistryError::Empty(_)) => Self::default(),
            Err(e @ RegistryError::Corrupt { .. }) => match Self::salvage(path) {
                Some(registry) => registry,
                None => {
                    warn!("{}, starting a new registry", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("{}, starting a new registry", e);
                Self::default()
            }
        }
    }

    /// Keeps the parseable entries of a registry whose JSON is still readable
    fn salvage(path: &Path) -> Option<Self> {
        let json = fs::read_to_string(path).ok()?;
        let file: RawRegistryFile = serde_json::from_str(&json).ok()?;

        let mut registry = Self::default();
        for entry in file.lighthouses.unwrap_or_default() {
            match entry.parse::<LighthouseAddress>() {
                Ok(address) => {
                    registry.register([address]);
                }
                Err(e) => warn!("Dropping registry entry: {}", e),
            }
        }
        Some(registry)
    }

    /// Appends addresses that are not registered yet, returning how many were new
    pub fn register<I>(&mut self, addresses: I) -> usize
    where
        I: IntoIterator<Item = LighthouseAddress>,
    {
        let before = self.lighthouses.len();
        for address in addresses {
            if !self.lighthouses.contains(&address) {
                self.lighthouses.push(address);
            }
        }
        self.lighthouses.len() - before
    }

    /// Writes the registry, creating its directory first
    #[instrument(skip(self), fields(lighthouses = self.lighthouses.len()))]
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| RegistryError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string(self).map_err(|source| RegistryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved lighthouse registry");
        Ok(())
    }
}
