//! Client for legacy OData/Atom NuGet package feeds.
//!
//! The crate is layered bottom-up:
//!
//! - [`transport`] - single-attempt HTTP GET with a tri-state outcome
//! - [`feed`] - parsing, endpoint discovery, querying and listing
//! - [`version`] - NuGet version parsing and ordering
//! - [`config`] - `~/.config/nufeed/config.toml`

pub mod config;
pub mod error;
pub mod feed;
pub mod transport;
pub mod version;

pub use error::FeedError;
pub use feed::{FeedClient, FeedSource, PackageEntry, PackageIdentity};
pub use version::NuGetVersion;
