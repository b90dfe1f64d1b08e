use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use super::BuildConfig;

/// A configuration source
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// A configuration file (TOML, JSON or YAML)
    File(PathBuf),
    /// No file, use the defaults
    Defaults,
}

const CANDIDATES: &[&str] = &[
    "Inliner.toml",
    ".inliner.toml",
    "inliner.json",
    ".inliner.json",
    "inliner.yaml",
    ".inliner.yaml",
];

impl Source {
    /// Find a first config source candidate in a directory
    pub fn find(path: &Path) -> Source {
        CANDIDATES
            .iter()
            .find_map(|name| check_path(path, name))
            .map(Source::File)
            .unwrap_or(Source::Defaults)
    }

    /// Load the configuration from the source.
    pub fn load(self) -> anyhow::Result<BuildConfig> {
        match self {
            Self::File(file) => {
                let mut cfg = load_from(&file)
                    .with_context(|| format!("error loading configuration {}", file.display()))?;
                // a relative base directory is relative to the configuration file
                if cfg.base_dir.is_relative() {
                    if let Some(parent) = file.parent() {
                        cfg.base_dir = parent.join(&cfg.base_dir);
                    }
                }
                Ok(cfg)
            }
            Self::Defaults => Ok(BuildConfig::default()),
        }
    }
}

/// Load configuration from a file
///
/// Currently supported formats are:
///
/// * TOML
/// * YAML
/// * JSON
fn load_from(file: &Path) -> anyhow::Result<BuildConfig> {
    match file.extension().map(|s| s.to_string_lossy()).as_deref() {
        Some("toml") => Ok(toml::from_str(&String::from_utf8(std::fs::read(file)?)?)?),
        Some("yaml") | Some("yml") => {
            Ok(serde_yaml::from_reader(BufReader::new(File::open(file)?))?)
        }
        Some("json") => Ok(serde_json::from_reader(BufReader::new(File::open(file)?))?),

        Some(n) => {
            bail!("Unsupported configuration file type: {n}");
        }
        None => {
            bail!("Missing configuration file extension");
        }
    }
}

/// Check if a file can be found in a directory.
fn check_path(path: &Path, name: &str) -> Option<PathBuf> {
    let path = path.join(name);
    if path.is_file() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuiltinPlugin, PluginSpec};

    #[test]
    fn find_prefers_toml() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(Source::find(dir.path()), Source::Defaults);

        std::fs::write(dir.path().join(".inliner.json"), "{}")?;
        std::fs::write(dir.path().join("Inliner.toml"), "")?;
        assert_eq!(
            Source::find(dir.path()),
            Source::File(dir.path().join("Inliner.toml"))
        );
        Ok(())
    }

    #[test]
    fn formats() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let toml = dir.path().join("Inliner.toml");
        std::fs::write(
            &toml,
            "debug = true\nbaseDir = \"public\"\n[plugins]\njs = [\"minifyJS\"]\n",
        )?;
        let cfg = Source::File(toml).load()?;
        assert!(cfg.debug);
        assert_eq!(cfg.base_dir, dir.path().join("public"));
        assert_eq!(
            cfg.plugins.js,
            vec![PluginSpec::Builtin(BuiltinPlugin::MinifyJs)]
        );

        let yaml = dir.path().join("inliner.yaml");
        std::fs::write(&yaml, "baseURL: https://example.com/\nminify:\n  mangle: false\n")?;
        let cfg = Source::File(yaml).load()?;
        assert_eq!(
            cfg.base_url.map(String::from).as_deref(),
            Some("https://example.com/")
        );
        assert!(!cfg.minify.mangle);

        let json = dir.path().join("inliner.json");
        std::fs::write(&json, r#"{ "baseDir": "/abs" }"#)?;
        assert_eq!(Source::File(json).load()?.base_dir, PathBuf::from("/abs"));
        Ok(())
    }

    #[test]
    fn unsupported_extension() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ini = dir.path().join("inliner.ini");
        std::fs::write(&ini, "")?;
        assert!(Source::File(ini).load().is_err());
        Ok(())
    }
}
