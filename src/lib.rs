pub mod archive;
pub mod commands;
pub mod discovery;
pub mod download;
pub mod error;
pub mod hash;
pub mod http;
pub mod index;
pub mod listing;
pub mod manifest;
pub mod reconcile;
pub mod render;
pub mod runtime;
pub mod source;
pub mod view;
