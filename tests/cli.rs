//! The command line interface, run as a separate process.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Result;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn inliner(args: &[&str], dir: &Path) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_inliner"))
        .args(args)
        .current_dir(dir)
        .env_remove("INLINER_CONFIG")
        .output()?)
}

#[test]
fn build_to_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let entry = fixture("index.html");
    let out = dir.path().join("index.html");
    let output = inliner(
        &[
            "--entry",
            &entry.to_string_lossy(),
            "--output",
            &out.to_string_lossy(),
            "--debug",
        ],
        dir.path(),
    )?;
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output.stdout.is_empty(), "the document goes to the file");

    let html = std::fs::read_to_string(&out)?;
    assert!(html.contains(r#"<style data-href="css/normalize.css">"#));
    assert!(html.contains(r#"<script data-src="js/es6-promise.js">"#));
    Ok(())
}

#[test]
fn build_subcommand_to_stdout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let entry = fixture("empty.html");
    let output = inliner(
        &["build", "--quiet", "--entry", &entry.to_string_lossy()],
        dir.path(),
    )?;
    assert!(output.status.success());
    assert_eq!(output.stdout, std::fs::read(&entry)?);
    assert!(output.stderr.is_empty(), "quiet runs print nothing");
    Ok(())
}

#[test]
fn failure_is_one_line_and_exit_one() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let entry = fixture("missing.html");
    let out = dir.path().join("index.html");
    let output = inliner(
        &[
            "--quiet",
            "--debug",
            "--entry",
            &entry.to_string_lossy(),
            "--output",
            &out.to_string_lossy(),
        ],
        dir.path(),
    )?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().last().unwrap_or_default();
    assert!(last.contains("missing.css"), "{stderr}");
    assert!(!out.exists(), "no output is left behind");
    Ok(())
}

#[test]
fn config_show_reads_the_config_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("Inliner.toml"),
        r#"
baseDir = "site"
baseURL = "https://example.com/"

[plugins]
css = []
"#,
    )?;

    let output = inliner(&["config", "show"], dir.path())?;
    assert!(output.status.success());

    let config: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(config["baseURL"], "https://example.com/");
    assert_eq!(config["plugins"]["css"], serde_json::json!([]));
    assert_eq!(
        config["plugins"]["js"],
        serde_json::json!(["bundle", "minifyJS"])
    );
    let base_dir = config["baseDir"].as_str().unwrap_or_default();
    assert!(base_dir.ends_with("site"), "{base_dir}");
    Ok(())
}

#[test]
fn unknown_plugin_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = inliner(&["--js-plugins", "bundle,uglify"], dir.path())?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown plugin `uglify`"));
    Ok(())
}
