//! Utility functions shared by the registry and the feed parser.
//!
//! - **URL validation**: only absolute http/https feed URLs are accepted
//! - **Display names**: host-based fallback names for untitled feeds

mod url_validator;

pub use url_validator::{display_domain, validate_feed_url, UrlValidationError};
