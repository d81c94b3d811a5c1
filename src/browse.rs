use log::warn;
use serde::Serialize;

use crate::error::CatalogError;
use crate::spotify::data::{Artist, Lookup, Track};
use crate::spotify::SpotifyClient;

/// Everything an artist page shows.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ArtistProfile {
    pub artist: Artist,
    pub top_tracks: Vec<Track>,
    pub related: Vec<Artist>,
}

/// Resolves `name` to an artist, then loads top tracks and related artists
/// side by side.
///
/// Only the search itself can fail the call. A failed secondary lookup is
/// logged and rendered as an empty list.
pub async fn load_artist_profile(
    client: &SpotifyClient,
    name: &str,
    market: &str,
    limit: usize,
) -> Result<Lookup<ArtistProfile>, CatalogError> {
    let artist = match client.search_artist(name).await? {
        Lookup::Found(artist) => artist,
        Lookup::NotFound => return Ok(Lookup::NotFound),
    };

    let (top_tracks, related) = tokio::join!(
        client.top_tracks(&artist.id, market, limit),
        client.get_related(&artist.id, limit),
    );

    Ok(Lookup::Found(ArtistProfile {
        top_tracks: or_empty(top_tracks, "top tracks", &artist),
        related: or_empty(related, "related artists", &artist),
        artist,
    }))
}

fn or_empty<T>(result: Result<Vec<T>, CatalogError>, what: &str, artist: &Artist) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!("[CATALOG] Could not load {} for {}: {}", what, artist.name, e);
        Vec::new()
    })
}
