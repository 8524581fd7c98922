use std::{fs::read_to_string, path::Path, path::PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Collection profile. All fields are optional, values given on the command
/// line take precedence.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub(crate) struct CollectProfile {
    /// Information about the profile in human readable format.
    pub(crate) about: Option<String>,
    /// Monitors to enable.
    pub(crate) monitors: Option<Vec<String>>,
    /// Extra flags used when compiling the probes.
    pub(crate) cflags: Vec<String>,
    /// Compiler used to build the probes.
    pub(crate) clang: Option<PathBuf>,
    /// File the records are written to.
    pub(crate) output: Option<PathBuf>,
    /// Also print records on the console.
    pub(crate) print: Option<bool>,
    /// Maximum duration of the collection, in seconds.
    pub(crate) timeout: Option<u64>,
    /// Time to keep collecting once the traced process exited, in seconds.
    pub(crate) linger: Option<u64>,
}

impl CollectProfile {
    /// Load a profile from a path.
    pub(crate) fn load<P: AsRef<Path>>(path: P) -> Result<CollectProfile> {
        let path = path.as_ref();
        let contents = read_to_string(path)
            .map_err(|e| anyhow!("Could not read profile {}: {e}", path.display()))?;
        Self::from_str(contents.as_str())
            .map_err(|e| anyhow!("Invalid profile {}: {e}", path.display()))
    }

    /// Load a profile from a string.
    pub(crate) fn from_str(contents: &str) -> Result<CollectProfile> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_file() {
        let p = CollectProfile::load("test_data/profiles/example.yaml").unwrap();
        assert_eq!(p.about.as_deref(), Some("Library loading only"));
        assert_eq!(
            p.monitors,
            Some(vec!["exec".to_string(), "open".to_string()])
        );
        assert_eq!(p.cflags, vec!["-DPATH_FILTER"]);
        assert_eq!(p.timeout, Some(30));
        assert!(p.clang.is_none());
    }

    #[test]
    fn empty_profile() {
        assert_eq!(
            CollectProfile::from_str("{}").unwrap(),
            CollectProfile::default()
        );
    }

    #[test]
    fn invalid_profiles() {
        assert!(CollectProfile::from_str("unknown_key: 1").is_err());
        assert!(CollectProfile::from_str("timeout: soon").is_err());
        assert!(CollectProfile::load("test_data/profiles/does_not_exist.yaml").is_err());
    }
}
