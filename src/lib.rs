//! daz-installer - DAZ Studio content archive installer
//!
//! Drives the 7-Zip command line to list archives, extract them into
//! staging and move their files into a content library.

pub mod archive;
pub mod config;
pub mod content;
pub mod installer;
pub mod paths;
pub mod settings;
