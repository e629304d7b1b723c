//! Helpers for working with feed addresses.
//!
//! - **Validation**: configured feed URLs must be absolute http(s) URLs
//! - **Display names**: a readable label derived from the address host
//!
//! # Examples
//!
//! ```
//! use newsroom::util::{display_name_from_url, validate_feed_url};
//!
//! let url = validate_feed_url("https://www.example.com/feed.xml").unwrap();
//! assert_eq!(display_name_from_url(url.as_str()), "example.com");
//! ```

mod feed_url;

pub use feed_url::{display_name_from_url, validate_feed_url, FeedUrlError};
