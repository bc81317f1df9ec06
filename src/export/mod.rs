//! Container rewriting: full-container compose, chapter extraction,
//! and chapter appending.

pub mod append;
pub mod ogg;
pub mod tonie;
