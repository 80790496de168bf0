//! Wiki page to Markdown conversion with local copies of page images.
//!
//! The pipeline is [`extract`] → [`images`] → [`markdown`] → [`download`] →
//! [`rewrite`], driven by [`convert::convert_page`]. [`wiki`] fetches pages
//! from a wiki server and [`routes`] exposes that over HTTP.

pub mod config;
pub mod convert;
pub mod download;
pub mod extract;
pub mod images;
pub mod markdown;
pub mod models;
pub mod page_ref;
pub mod rewrite;
pub mod routes;
pub mod wiki;
