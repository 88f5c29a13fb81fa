pub mod acquisition;
pub mod app;
pub mod config;
pub mod document;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod migration;
pub mod output;
pub mod scanner;
pub mod store;
pub mod timeline;
