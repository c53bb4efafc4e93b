//! restack CLI - rewrite the layer stack of container images.

pub mod commands;
pub mod output;
