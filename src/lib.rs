//! Catalog client and local state for the Encore music crowdfunding site.
//!
//! [`spotify::SpotifyClient`] talks to the music catalog with a cached
//! client-credentials token. [`store`] keeps the visitor's preferences and
//! session between runs.

pub mod browse;
pub mod config;
pub mod error;
pub mod spotify;
pub mod store;
pub mod utils;

pub use browse::{load_artist_profile, ArtistProfile};
pub use error::{CatalogError, ConfigError, StoreError};
pub use spotify::auth::{CachedToken, Clock, Credential, SystemClock};
pub use spotify::data::{Album, Artist, CatalogEntity, Lookup, Track};
pub use spotify::SpotifyClient;
