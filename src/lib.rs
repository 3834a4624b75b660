pub mod chart;
pub mod config;
pub mod exec;
pub mod experiment;
mod ext;
pub mod format;
pub mod host;
pub mod measurement;
pub mod parse;
pub mod stats;

#[cfg(test)]
mod testing;
