//! Extracts an inventory of images, videos, fonts and colours from a web
//! page, either by rendering it in a browser or by pattern matching its HTML.

pub mod api;
pub mod assemble;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod normalize;
