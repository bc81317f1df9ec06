//! `tonieshell` — a terminal toolkit for Tonie audio containers.
//!
//! This crate provides the core library for decoding and encoding the
//! container header, parsing the Ogg Opus payload, verifying payload
//! integrity, and rewriting containers chapter by chapter.

pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod store;
