//! Core value types: the container header and Ogg pages.

pub mod header;
pub mod page;
