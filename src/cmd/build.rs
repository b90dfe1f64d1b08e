use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use inliner::common::{BUILDING, ERROR, SUCCESS, cwd, path_exists, strip_prefix};
use inliner::config::{self, BuildConfig, PluginSpec};
use inliner::{BuildOutput, Builder, Entry};
use url::Url;

/// Inline the local stylesheets & scripts of a document.
#[derive(Clone, Debug, Default, Args)]
#[command(name = "build")]
#[command(next_help_heading = "Build")]
pub struct Build {
    /// The entry HTML document [default: stdin]
    #[arg(short, long)]
    pub entry: Option<PathBuf>,

    /// The file to write the finished document to [default: stdout]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// The directory relative references are resolved against.
    ///
    /// Only used when reading the document from stdin, otherwise the folder of the entry is used.
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// The URL the `href` of `<base>` elements is resolved against
    #[arg(long)]
    pub base_url: Option<Url>,

    /// Inline the raw assets, skipping all plugins
    #[arg(long)]
    pub debug: bool,

    /// A comma-separated list of plugins for scripts
    #[arg(long, value_delimiter = ',')]
    pub js_plugins: Option<Vec<PluginSpec>>,

    /// A comma-separated list of plugins for stylesheets
    #[arg(long, value_delimiter = ',')]
    pub css_plugins: Option<Vec<PluginSpec>>,
}

impl Build {
    /// apply CLI overrides to the configuration
    pub fn apply_to(self, mut config: BuildConfig) -> Result<BuildConfig> {
        let Self {
            entry: _,
            output: _,
            base_dir,
            base_url,
            debug,
            js_plugins,
            css_plugins,
        } = self;

        config.base_dir = base_dir
            .map(|base_dir| cwd().join(base_dir))
            .unwrap_or(config.base_dir);
        config.base_url = base_url.or(config.base_url);
        config.debug |= debug;
        config.plugins.js = js_plugins.unwrap_or(config.plugins.js);
        config.plugins.css = css_plugins.unwrap_or(config.plugins.css);

        Ok(config)
    }

    #[tracing::instrument(level = "trace", skip(self, config))]
    pub async fn run(self, config: Option<PathBuf>) -> Result<()> {
        let cfg = config::load(config)?;
        let entry = self.entry.clone();
        let output = self.output.clone();
        let cfg = self.apply_to(cfg)?;

        let builder = Builder::new(cfg);
        let build = match &entry {
            Some(path) => {
                tracing::info!("{}inlining {}", BUILDING, strip_prefix(path).display());
                builder.build(path.as_path())
            }
            None => {
                tracing::info!("{}inlining <stdin>", BUILDING);
                builder.build(Entry::reader(tokio::io::stdin()))
            }
        };

        let result = match &output {
            Some(path) => write_file(build, path).await,
            None => build
                .write_to(&mut tokio::io::stdout())
                .await
                .map_err(anyhow::Error::from),
        };
        match result {
            Ok(()) => {
                tracing::info!("{}success", SUCCESS);
                Ok(())
            }
            Err(err) => {
                tracing::error!("{}build failed", ERROR);
                Err(err)
            }
        }
    }
}

/// Write the output to a sibling of `path`, which replaces `path` only once the build succeeded.
async fn write_file(build: BuildOutput, path: &Path) -> Result<()> {
    let Some(name) = path.file_name() else {
        bail!("output path {} is not a file", path.display());
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if !path_exists(dir).await? {
        bail!("output directory {} does not exist", dir.display());
    }

    let partial = dir.join({
        let mut partial = OsString::from(".");
        partial.push(name);
        partial.push(".partial");
        partial
    });
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("error creating output file {}", partial.display()))?;

    if let Err(err) = build.write_to(&mut file).await {
        drop(file);
        if let Err(remove) = tokio::fs::remove_file(&partial).await {
            tracing::debug!("error removing {}: {remove}", partial.display());
        }
        return Err(err.into());
    }

    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("error moving output into place at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use inliner::BuiltinPlugin;

    #[test]
    fn overrides() -> Result<()> {
        let build = Build {
            base_dir: Some("/site".into()),
            base_url: Some(Url::parse("https://example.com/app/").expect("url")),
            debug: true,
            css_plugins: Some(vec![]),
            ..Build::default()
        };
        let config = build.apply_to(BuildConfig::default())?;

        assert_eq!(config.base_dir, PathBuf::from("/site"));
        assert_eq!(
            config.base_url.as_ref().map(Url::as_str),
            Some("https://example.com/app/")
        );
        assert!(config.debug);
        assert_eq!(
            config.plugins.js,
            vec![
                PluginSpec::Builtin(BuiltinPlugin::Bundle),
                PluginSpec::Builtin(BuiltinPlugin::MinifyJs),
            ]
        );
        assert!(config.plugins.css.is_empty());
        Ok(())
    }

    #[test]
    fn no_overrides() -> Result<()> {
        let original = BuildConfig {
            debug: true,
            ..BuildConfig::default()
        };
        let config = Build::default().apply_to(original.clone())?;
        assert_eq!(config, original);
        Ok(())
    }

    #[tokio::test]
    async fn failed_build_keeps_previous_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.html");
        std::fs::write(&path, "previous")?;

        let failed = BuildOutput::failed(inliner::ErrorReason::WorkerLost.into_error());
        assert!(write_file(failed, &path).await.is_err());
        assert_eq!(std::fs::read_to_string(&path)?, "previous");
        assert!(!dir.path().join(".out.html.partial").exists());
        Ok(())
    }

    #[tokio::test]
    async fn missing_output_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let failed = BuildOutput::failed(inliner::ErrorReason::WorkerLost.into_error());
        let err = write_file(failed, &dir.path().join("nope/out.html"))
            .await
            .expect_err("directory is missing");
        assert!(err.to_string().contains("does not exist"));
        Ok(())
    }
}
