use std::collections::HashSet;

use log::debug;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CatalogError;
use crate::spotify::SpotifyClient;
use crate::utils::{error_message, retry_after};

/// A record from the catalog keyed by its upstream id.
pub trait CatalogEntity: DeserializeOwned + Send + 'static {
    /// REST collection, also the key of the search result page.
    const COLLECTION: &'static str;
    /// Value of the `type` search parameter.
    const SEARCH_TYPE: &'static str;

    fn id(&self) -> &str;
}

/// Outcome of a lookup that may legitimately find nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Lookup::NotFound, Lookup::Found)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    pub popularity: Option<u32>,
    pub followers: Option<Followers>,
    #[serde(default)]
    pub images: Vec<Image>,
    pub external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub explicit: bool,
    pub popularity: Option<u32>,
    #[serde(default)]
    pub artists: Vec<SimplifiedArtist>,
    pub album: Option<SimplifiedAlbum>,
    pub preview_url: Option<String>,
    pub external_ids: Option<ExternalIds>,
    pub external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub album_type: Option<String>,
    pub release_date: Option<String>,
    pub total_tracks: Option<u32>,
    #[serde(default)]
    pub artists: Vec<SimplifiedArtist>,
    #[serde(default)]
    pub images: Vec<Image>,
    pub external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SimplifiedArtist {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SimplifiedAlbum {
    pub id: Option<String>,
    pub name: String,
    pub release_date: Option<String>,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ExternalIds {
    pub isrc: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Followers {
    pub href: Option<String>,
    pub total: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Image {
    pub url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

impl CatalogEntity for Artist {
    const COLLECTION: &'static str = "artists";
    const SEARCH_TYPE: &'static str = "artist";

    fn id(&self) -> &str {
        &self.id
    }
}

impl CatalogEntity for Track {
    const COLLECTION: &'static str = "tracks";
    const SEARCH_TYPE: &'static str = "track";

    fn id(&self) -> &str {
        &self.id
    }
}

impl CatalogEntity for Album {
    const COLLECTION: &'static str = "albums";
    const SEARCH_TYPE: &'static str = "album";

    fn id(&self) -> &str {
        &self.id
    }
}

impl SpotifyClient {
    /// Top search match for `name`, or `NotFound` when the catalog has none.
    pub async fn search_by_name<E: CatalogEntity>(&self, name: &str) -> Result<Lookup<E>, CatalogError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(Lookup::NotFound);
        }

        let url = self.url("search");
        let response = self
            .send_authorized(|http| {
                http.get(&url)
                    .query(&[("q", name), ("type", E::SEARCH_TYPE), ("limit", "1")])
            })
            .await?;
        let response = ensure_success(response).await?;
        let response_json = response.json::<Value>().await?;

        let first = response_json[E::COLLECTION]["items"]
            .get(0)
            .filter(|item| !item.is_null())
            .cloned();
        match first {
            Some(item) => Ok(Lookup::Found(serde_json::from_value(item)?)),
            None => {
                debug!("No {} found for {:?}", E::SEARCH_TYPE, name);
                Ok(Lookup::NotFound)
            }
        }
    }

    pub async fn get_by_id<E: CatalogEntity>(&self, id: &str) -> Result<Lookup<E>, CatalogError> {
        check_id(id)?;

        let url = self.url(&format!("{}/{}", E::COLLECTION, id));
        let response = self.send_authorized(|http| http.get(&url)).await?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            return Err(invalid_id(id, response).await);
        }
        let response = ensure_success(response).await?;
        if status == StatusCode::NO_CONTENT {
            return Ok(Lookup::NotFound);
        }

        let body = response.text().await?;
        let body = body.trim();
        if body.is_empty() || body == "null" {
            return Ok(Lookup::NotFound);
        }
        Ok(Lookup::Found(serde_json::from_str(body)?))
    }

    /// Artists related to `id`, de-duplicated and capped at `limit`.
    /// An artist without related data yields an empty list.
    pub async fn get_related(&self, id: &str, limit: usize) -> Result<Vec<Artist>, CatalogError> {
        self.fetch_list(id, &format!("artists/{}/related-artists", id), &[], "artists", limit)
            .await
    }

    /// The artist's most popular tracks in `market`, de-duplicated and capped
    /// at `limit`.
    pub async fn top_tracks(&self, artist_id: &str, market: &str, limit: usize) -> Result<Vec<Track>, CatalogError> {
        self.fetch_list(
            artist_id,
            &format!("artists/{}/top-tracks", artist_id),
            &[("market", market)],
            "tracks",
            limit,
        )
        .await
    }

    pub async fn search_artist(&self, name: &str) -> Result<Lookup<Artist>, CatalogError> {
        self.search_by_name(name).await
    }

    pub async fn artist(&self, id: &str) -> Result<Lookup<Artist>, CatalogError> {
        self.get_by_id(id).await
    }

    pub async fn track(&self, id: &str) -> Result<Lookup<Track>, CatalogError> {
        self.get_by_id(id).await
    }

    pub async fn album(&self, id: &str) -> Result<Lookup<Album>, CatalogError> {
        self.get_by_id(id).await
    }

    async fn fetch_list<E: CatalogEntity>(
        &self,
        id: &str,
        path: &str,
        query: &[(&str, &str)],
        key: &str,
        limit: usize,
    ) -> Result<Vec<E>, CatalogError> {
        check_id(id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let url = self.url(path);
        let response = self.send_authorized(|http| http.get(&url).query(query)).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => {
                debug!("No {} available for {}", key, id);
                return Ok(Vec::new());
            }
            StatusCode::BAD_REQUEST => return Err(invalid_id(id, response).await),
            _ => {}
        }
        let response = ensure_success(response).await?;
        let response_json = response.json::<Value>().await?;

        let items = match response_json[key].as_array() {
            Some(items) => items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| serde_json::from_value::<E>(item.clone()))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(dedup_by_id(items, limit))
    }
}

/// Keeps the first occurrence of each id, up to `limit` entries.
pub fn dedup_by_id<E: CatalogEntity>(items: impl IntoIterator<Item = E>, limit: usize) -> Vec<E> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id().to_string()))
        .take(limit)
        .collect()
}

/// Ids are spliced into the request path, so they must form exactly one
/// plain segment: no separators, escapes or dot segments.
fn check_id(id: &str) -> Result<(), CatalogError> {
    let plain_segment = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '~'));
    if id.is_empty() || !plain_segment || id.chars().all(|c| c == '.') {
        return Err(CatalogError::InvalidId {
            id: id.to_string(),
            message: "malformed identifier".to_string(),
        });
    }
    Ok(())
}

async fn invalid_id(id: &str, response: Response) -> CatalogError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    CatalogError::InvalidId {
        id: id.to_string(),
        message: error_message(&body).unwrap_or_else(|| status.to_string()),
    }
}

async fn ensure_success(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(CatalogError::RateLimited { retry_after: retry_after(response.headers()) });
    }

    let body = response.text().await.unwrap_or_default();
    Err(CatalogError::Upstream {
        status: status.as_u16(),
        message: error_message(&body).unwrap_or_else(|| status.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist(id: &str) -> Artist {
        Artist {
            id: id.to_string(),
            name: format!("Artist {}", id),
            genres: Vec::new(),
            popularity: None,
            followers: None,
            images: Vec::new(),
            external_urls: None,
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence_and_caps() {
        let items = ["a", "b", "a", "c", "b", "d", "e", "f"].map(artist);
        let ids: Vec<String> = dedup_by_id(items, 4).into_iter().map(|a| a.id).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
    }

    #[test]
    fn dedup_with_zero_limit_is_empty() {
        assert!(dedup_by_id(["a", "b"].map(artist), 0).is_empty());
    }

    #[test]
    fn rejects_malformed_ids() {
        for id in ["", "a/b", "a b", "a?x=1", "a#b", ".", "..", "...", "a\\b", "a%2Fb", "é"] {
            assert!(matches!(check_id(id), Err(CatalogError::InvalidId { .. })), "{id:?}");
        }
        assert!(check_id("4Z8W4fKeB5YxbusRsdQVPb").is_ok());
        assert!(check_id("spotify:artist:4Z8W4fKeB5YxbusRsdQVPb").is_ok());
        assert!(check_id("v1.2").is_ok());
    }

    #[test]
    fn deserializes_sparse_track() {
        let track: Track = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "name": "Song",
            "artists": [{"id": "a1", "name": "Band"}],
            "external_ids": {"isrc": "USRC17607839"}
        }))
        .unwrap();

        assert_eq!(track.duration_ms, 0);
        assert!(!track.explicit);
        assert_eq!(track.artists[0].name, "Band");
        assert_eq!(track.external_ids.and_then(|ids| ids.isrc).as_deref(), Some("USRC17607839"));
    }

    #[test]
    fn lookup_converts_from_option() {
        assert_eq!(Lookup::from(Some(1)).map(|v| v + 1), Lookup::Found(2));
        assert!(!Lookup::<u8>::from(None).is_found());
        assert_eq!(Lookup::Found("x").into_option(), Some("x"));
    }
}
