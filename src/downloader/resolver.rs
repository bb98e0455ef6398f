// Unit resolution - turns one submitted URL into an ordered list of units

use super::models::{DownloadUnit, FlatEntry, FlatListing};
use super::traits::MediaBackend;

/// Title used when the backend does not report one
pub const UNKNOWN_TITLE: &str = "Unknown";

/// Canonical watch URL for entries that only carry an id
const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Units plus the collection title, when the URL was a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub collection_title: Option<String>,
    pub units: Vec<DownloadUnit>,
}

pub struct UnitResolver;

impl UnitResolver {
    /// Resolve `url` through a flat listing.
    ///
    /// Never fails: if the listing call errors the result is a single
    /// best-effort unit pointing at `url`, since the fetch may still work.
    pub async fn resolve(backend: &dyn MediaBackend, url: &str) -> Resolution {
        match backend.list_flat(url).await {
            Ok(listing) => Self::from_listing(url, listing),
            Err(e) => {
                tracing::warn!(
                    backend = backend.name(),
                    url,
                    error = %e,
                    "flat listing failed, falling back to direct fetch"
                );
                Resolution {
                    collection_title: None,
                    units: vec![Self::fallback_unit(url)],
                }
            }
        }
    }

    fn from_listing(url: &str, listing: FlatListing) -> Resolution {
        if !listing.is_collection {
            // Keep the user's URL rather than whatever the backend rewrote it to
            return Resolution {
                collection_title: None,
                units: vec![DownloadUnit {
                    index: 0,
                    title: listing.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
                    source_ref: url.to_string(),
                    external_id: listing.id,
                }],
            };
        }

        let units: Vec<DownloadUnit> = listing
            .entries
            .into_iter()
            .filter_map(|entry| {
                let source_ref = Self::source_ref(&entry);
                if source_ref.is_none() {
                    tracing::warn!(url, ?entry, "skipping collection entry with no url or id");
                }
                source_ref.map(|source_ref| (entry, source_ref))
            })
            .enumerate()
            .map(|(index, (entry, source_ref))| DownloadUnit {
                index,
                title: entry.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
                source_ref,
                external_id: entry.external_id,
            })
            .collect();

        tracing::info!(url, units = units.len(), "resolved collection");

        Resolution {
            collection_title: Some(listing.title.unwrap_or_else(|| "Playlist".to_string())),
            units,
        }
    }

    /// Direct URL, then webpage URL, then a URL built from the id
    fn source_ref(entry: &FlatEntry) -> Option<String> {
        let non_empty = |s: &Option<String>| s.as_ref().filter(|s| !s.trim().is_empty()).cloned();

        non_empty(&entry.direct_url)
            .or_else(|| non_empty(&entry.webpage_url))
            .or_else(|| non_empty(&entry.external_id).map(|id| format!("{}{}", WATCH_URL_PREFIX, id)))
    }

    pub fn fallback_unit(url: &str) -> DownloadUnit {
        DownloadUnit {
            index: 0,
            title: UNKNOWN_TITLE.to_string(),
            source_ref: url.to_string(),
            external_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::{DownloadError, Result};
    use crate::downloader::models::{FetchOptions, RawProgressEvent};
    use async_trait::async_trait;

    struct ListingBackend(std::result::Result<FlatListing, String>);

    #[async_trait]
    impl MediaBackend for ListingBackend {
        fn name(&self) -> &'static str {
            "listing"
        }

        async fn list_flat(&self, _url: &str) -> Result<FlatListing> {
            self.0.clone().map_err(DownloadError::Extraction)
        }

        async fn fetch(
            &self,
            _source_ref: &str,
            _options: &FetchOptions,
            _on_progress: &mut (dyn FnMut(RawProgressEvent) -> Result<()> + Send),
        ) -> Result<()> {
            Ok(())
        }
    }

    fn entry(title: Option<&str>, url: Option<&str>, page: Option<&str>, id: Option<&str>) -> FlatEntry {
        FlatEntry {
            title: title.map(String::from),
            direct_url: url.map(String::from),
            webpage_url: page.map(String::from),
            external_id: id.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_single_item_keeps_input_url() {
        let backend = ListingBackend(Ok(FlatListing {
            is_collection: false,
            title: Some("A video".to_string()),
            id: Some("abc".to_string()),
            entries: vec![],
        }));
        let resolution = UnitResolver::resolve(&backend, "https://youtu.be/abc").await;
        assert_eq!(resolution.collection_title, None);
        assert_eq!(
            resolution.units,
            vec![DownloadUnit {
                index: 0,
                title: "A video".to_string(),
                source_ref: "https://youtu.be/abc".to_string(),
                external_id: Some("abc".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_collection_source_ref_preference() {
        let backend = ListingBackend(Ok(FlatListing {
            is_collection: true,
            title: Some("Mix".to_string()),
            id: None,
            entries: vec![
                entry(Some("one"), Some("https://a/1"), Some("https://page/1"), Some("1")),
                entry(None, None, Some("https://page/2"), Some("2")),
                entry(Some("three"), Some(""), None, Some("3")),
            ],
        }));
        let resolution = UnitResolver::resolve(&backend, "https://list").await;
        assert_eq!(resolution.collection_title.as_deref(), Some("Mix"));

        let refs: Vec<&str> = resolution.units.iter().map(|u| u.source_ref.as_str()).collect();
        assert_eq!(
            refs,
            vec!["https://a/1", "https://page/2", "https://www.youtube.com/watch?v=3"]
        );
        assert_eq!(resolution.units[1].title, UNKNOWN_TITLE);
        let indexes: Vec<usize> = resolution.units.iter().map(|u| u.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unfetchable_entries_skipped() {
        let backend = ListingBackend(Ok(FlatListing {
            is_collection: true,
            title: None,
            id: None,
            entries: vec![
                entry(Some("gone"), None, None, None),
                entry(Some("ok"), Some("https://a/ok"), None, None),
            ],
        }));
        let resolution = UnitResolver::resolve(&backend, "https://list").await;
        assert_eq!(resolution.units.len(), 1);
        assert_eq!(resolution.units[0].index, 0);
        assert_eq!(resolution.units[0].title, "ok");
        assert_eq!(resolution.collection_title.as_deref(), Some("Playlist"));
    }

    #[tokio::test]
    async fn test_listing_failure_falls_back() {
        let backend = ListingBackend(Err("Unsupported URL".to_string()));
        let resolution = UnitResolver::resolve(&backend, "https://odd.site/x").await;
        assert_eq!(resolution.units, vec![UnitResolver::fallback_unit("https://odd.site/x")]);
        assert_eq!(resolution.units[0].title, "Unknown");
    }

    #[tokio::test]
    async fn test_resolution_is_repeatable() {
        let backend = ListingBackend(Ok(FlatListing {
            is_collection: true,
            title: None,
            id: None,
            entries: vec![
                entry(Some("a"), Some("https://a"), None, None),
                entry(Some("b"), None, None, Some("b")),
            ],
        }));
        let first = UnitResolver::resolve(&backend, "https://list").await;
        let second = UnitResolver::resolve(&backend, "https://list").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let backend = ListingBackend(Ok(FlatListing {
            is_collection: true,
            ..FlatListing::default()
        }));
        let resolution = UnitResolver::resolve(&backend, "https://list").await;
        assert!(resolution.units.is_empty());
    }
}
