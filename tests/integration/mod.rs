//! Integration tests for pkgplan
//!
//! Each module drives the public API (or the binary) against real
//! directories, git and svn repositories and a local HTTP server. Tests
//! backed by a VCS return early when its client is not installed.

#[path = "../common/mod.rs"]
mod common;

mod cache;
mod cli;
mod fs_resolver;
mod git_resolver;
mod manager;
mod svn_resolver;
mod url_resolver;
