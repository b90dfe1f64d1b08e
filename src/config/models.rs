//! The configuration model
//!
//! This is what the user provides in a configuration file. The CLI will override certain aspects
//! of it, and the builder will set the base directory from the entry document.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::common::cwd;

/// Configuration of a single build.
///
/// Immutable during a build, every build works on its own copy.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildConfig {
    /// The directory relative references of the document are resolved against.
    pub base_dir: PathBuf,
    /// Prefix for the `href` of `<base>` elements.
    #[serde(rename = "baseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Url>,
    /// Skip all transform plugins and inline raw assets.
    pub debug: bool,
    /// Plugin chains, per asset kind.
    pub plugins: Plugins,
    /// The command used by the `bundle` plugin.
    pub bundle: BundleOptions,
    /// Options of the `minifyJS` plugin.
    pub minify: MinifyOptions,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base_dir: cwd().to_path_buf(),
            base_url: None,
            debug: false,
            plugins: Plugins::default(),
            bundle: BundleOptions::default(),
            minify: MinifyOptions::default(),
        }
    }
}

/// Ordered plugin lists for scripts and stylesheets.
///
/// Both lists default independently, so overriding one keeps the default of the other.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Plugins {
    #[serde(default = "Plugins::default_js")]
    pub js: Vec<PluginSpec>,
    #[serde(default = "Plugins::default_css")]
    pub css: Vec<PluginSpec>,
}

impl Plugins {
    pub fn default_js() -> Vec<PluginSpec> {
        vec![
            PluginSpec::Builtin(BuiltinPlugin::Bundle),
            PluginSpec::Builtin(BuiltinPlugin::MinifyJs),
        ]
    }

    pub fn default_css() -> Vec<PluginSpec> {
        vec![PluginSpec::Builtin(BuiltinPlugin::MinifyCss)]
    }
}

impl Default for Plugins {
    fn default() -> Self {
        Self {
            js: Self::default_js(),
            css: Self::default_css(),
        }
    }
}

/// A plugin identifier, as found in the configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PluginSpec {
    /// One of the plugins shipped with the inliner.
    Builtin(BuiltinPlugin),
    /// An external command, the asset is piped through its stdin and stdout.
    Command(CommandSpec),
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(builtin) => fmt::Display::fmt(builtin, f),
            Self::Command(command) => f.write_str(&command.command),
        }
    }
}

impl FromStr for PluginSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<BuiltinPlugin>().map(Self::Builtin).map_err(|_| {
            anyhow::anyhow!(
                "unknown plugin `{s}`, expected one of: {}, {}, {}",
                BuiltinPlugin::Bundle,
                BuiltinPlugin::MinifyJs,
                BuiltinPlugin::MinifyCss,
            )
        })
    }
}

/// Plugins shipped with the inliner.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::IntoStaticStr,
)]
pub enum BuiltinPlugin {
    /// Bundle a script and its imports, using [`BuildConfig::bundle`].
    #[serde(rename = "bundle")]
    #[strum(serialize = "bundle")]
    Bundle,
    /// Minify a script.
    #[serde(rename = "minifyJS")]
    #[strum(serialize = "minifyJS")]
    MinifyJs,
    /// Minify a stylesheet.
    #[serde(rename = "minifyCSS")]
    #[strum(serialize = "minifyCSS")]
    MinifyCss,
}

/// An external command used as a plugin.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// The bundler command.
///
/// It is run in the folder of the script, reading the script from stdin and writing the bundle
/// to stdout.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BundleOptions {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            command: "esbuild".to_string(),
            args: vec!["--bundle".to_string(), "--log-level=error".to_string()],
        }
    }
}

impl From<BundleOptions> for CommandSpec {
    fn from(value: BundleOptions) -> Self {
        Self {
            command: value.command,
            args: value.args,
        }
    }
}

/// Options of the script minifier.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MinifyOptions {
    /// Shorten local names.
    pub mangle: bool,
}

impl Default for MinifyOptions {
    fn default() -> Self {
        Self { mangle: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_lists_default_independently() -> anyhow::Result<()> {
        let cfg: BuildConfig = serde_json::from_str(r#"{ "plugins": { "js": [] } }"#)?;
        assert!(cfg.plugins.js.is_empty());
        assert_eq!(cfg.plugins.css, Plugins::default_css());

        let cfg: BuildConfig = serde_json::from_str(r#"{ "plugins": { "css": [] } }"#)?;
        assert_eq!(cfg.plugins.js, Plugins::default_js());
        assert!(cfg.plugins.css.is_empty());
        Ok(())
    }

    #[test]
    fn camel_case_keys() -> anyhow::Result<()> {
        let cfg: BuildConfig = serde_json::from_str(
            r#"{
                "baseDir": "/site",
                "baseURL": "https://example.com/app/v1/",
                "debug": true,
                "minify": { "mangle": false }
            }"#,
        )?;
        assert_eq!(cfg.base_dir, PathBuf::from("/site"));
        assert_eq!(
            cfg.base_url.as_ref().map(Url::as_str),
            Some("https://example.com/app/v1/")
        );
        assert!(cfg.debug);
        assert!(!cfg.minify.mangle);
        assert_eq!(cfg.bundle, BundleOptions::default());

        let json = serde_json::to_value(&cfg)?;
        assert_eq!(json["baseURL"], "https://example.com/app/v1/");
        assert_eq!(json["baseDir"], "/site");
        Ok(())
    }

    #[test]
    fn plugin_specs() -> anyhow::Result<()> {
        let plugins: Plugins = serde_json::from_str(
            r#"{
                "js": ["minifyJS", { "command": "sed", "args": ["s/a/b/"] }],
                "css": []
            }"#,
        )?;
        assert_eq!(
            plugins.js,
            vec![
                PluginSpec::Builtin(BuiltinPlugin::MinifyJs),
                PluginSpec::Command(CommandSpec {
                    command: "sed".into(),
                    args: vec!["s/a/b/".into()],
                }),
            ]
        );

        assert!(serde_json::from_str::<PluginSpec>(r#""uglify""#).is_err());
        Ok(())
    }

    #[test]
    fn plugin_names() -> anyhow::Result<()> {
        assert_eq!("minifyCSS".parse::<PluginSpec>()?.to_string(), "minifyCSS");
        assert_eq!(BuiltinPlugin::Bundle.as_ref(), "bundle");
        let err = "uglify".parse::<PluginSpec>().expect_err("unknown plugin");
        assert!(err.to_string().contains("minifyJS"));
        Ok(())
    }
}
