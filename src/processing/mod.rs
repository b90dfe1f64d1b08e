//! Byte level processing of assets.

pub mod minify;
pub mod replace;
