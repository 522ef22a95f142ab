mod build;
pub mod config;

pub use build::{BuildReport, build, run};
pub use config::{BuildConfig, BuildOptions, USER_AGENT};
