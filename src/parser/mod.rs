//! Container parsing: the Ogg page stream that follows the header page.

pub mod ogg;
