//! CLI command implementations.

pub(crate) mod build;
pub(crate) mod dev;
pub(crate) mod kill;

pub(crate) use build::BuildArgs;
pub(crate) use dev::DevArgs;
pub(crate) use kill::KillArgs;
