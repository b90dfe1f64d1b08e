use anyhow::{anyhow, bail};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;

/// How the top level of a script is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopLevelMode {
    /// A classic script, top level names are globals.
    Global,
    /// An ES module.
    Module,
}

/// perform JS minification
pub fn minify_js(source: &str, mode: TopLevelMode, mangle: bool) -> anyhow::Result<String> {
    let allocator = Allocator::default();
    let source_type = match mode {
        TopLevelMode::Module => SourceType::mjs(),
        TopLevelMode::Global => SourceType::mjs().with_module(false),
    };

    let ret = Parser::new(&allocator, source, source_type).parse();
    if let Some(err) = ret.errors.first() {
        bail!("Failed to parse JS: {err}");
    }

    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: mangle.then(MangleOptions::default),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);

    Ok(Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code)
}

/// perform CSS minification
pub fn minify_css(source: &str) -> anyhow::Result<String> {
    let mut stylesheet = StyleSheet::parse(source, ParserOptions::default())
        .map_err(|err| anyhow!("Failed to parse CSS: {err}"))?;
    stylesheet
        .minify(MinifyOptions::default())
        .map_err(|err| anyhow!("Failed to minify CSS: {err}"))?;

    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|err| anyhow!("Failed to print CSS: {err}"))?;

    Ok(result.code)
}
