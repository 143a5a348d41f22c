//! NFS Mamont - filehandle core for a user-space NFSv3 server.
//!
//! This crate owns the translation between local filesystem paths and the
//! opaque, persistent handles NFSv3 clients carry ([`fh`]), a local-disk
//! adapter wired to that core ([`fs::LocalFs`]), the `Vfs` trait it
//! implements ([`vfs`]), and the configuration surface for running it
//! ([`config`]).

pub mod config;
pub mod fh;
pub mod fs;
pub mod vfs;
