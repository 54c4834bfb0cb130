//! preview-proxy: a server-side page-rendering proxy.
//!
//! An HTTP proxy that, for requests carrying the `req_for_preview` query
//! key, drives a pool of pre-warmed headless Chrome instances to render the
//! target URL, strips executable content from the result, and returns
//! either a single gzipped HTML body (batch mode) or an incremental stream
//! of DOM updates that a thin client stub replays into a blank document
//! (streaming mode). The point is to move JavaScript execution off slow
//! clients and onto the server.

pub mod cdp;
pub mod chrome;
pub mod cli;
pub mod config;
pub mod dom;
pub mod handlers;
pub mod sanitize;
pub mod server;
