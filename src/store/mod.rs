//! Container file access: header decode plus Ogg page enumeration.

pub mod reader;
