//! Media provider port: a narrow capability contract over whatever
//! upstream library/radio/playlist source is configured, mirroring the way
//! the backend port narrows media backends to a contract rather than a
//! wire format. One implementation ships (`NullProvider`); real providers
//! plug in behind the same trait.

pub mod favorites;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FolderItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderPage {
    pub items: Vec<FolderItem>,
    pub total: u32,
    pub offset: u32,
    pub limit: u32,
}

impl FolderPage {
    pub fn empty(offset: u32, limit: u32) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            offset,
            limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub scanning: bool,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedMedia {
    pub audiopath: String,
}

pub trait MediaProvider: Send + Sync {
    fn get_media_folder(&self, id: &str, offset: u32, limit: u32) -> FolderPage;
    fn get_radios(&self, offset: u32, limit: u32) -> FolderPage;
    fn get_playlists(&self, offset: u32, limit: u32) -> FolderPage;
    fn get_service_folder(&self, service: &str, id: &str, offset: u32, limit: u32) -> FolderPage;
    fn global_search(&self, query: &str, offset: u32, limit: u32) -> FolderPage;
    fn available_services(&self) -> Vec<ServiceDescriptor>;
    fn scan_status(&self) -> ScanStatus;
    fn recent(&self, offset: u32, limit: u32) -> FolderPage;
    fn clear_recent(&self);
    fn resolve_station(&self, service: &str, user: &str, id: &str) -> ResolvedMedia;
    fn resolve_playlist(&self, path: &str, item: Option<&str>) -> ResolvedMedia;
    fn resolve_media_item(&self, id: &str, parent: Option<&str>, shuffle: Option<bool>) -> ResolvedMedia;
}

/// Returns empty-but-correctly-shaped pages and echoes any id back as a
/// resolved audiopath, so provider-backed routes are exercisable end to
/// end without wiring in a real media library.
pub struct NullProvider;

impl NullProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaProvider for NullProvider {
    fn get_media_folder(&self, _id: &str, offset: u32, limit: u32) -> FolderPage {
        FolderPage::empty(offset, limit)
    }

    fn get_radios(&self, offset: u32, limit: u32) -> FolderPage {
        FolderPage::empty(offset, limit)
    }

    fn get_playlists(&self, offset: u32, limit: u32) -> FolderPage {
        FolderPage::empty(offset, limit)
    }

    fn get_service_folder(&self, _service: &str, _id: &str, offset: u32, limit: u32) -> FolderPage {
        FolderPage::empty(offset, limit)
    }

    fn global_search(&self, _query: &str, offset: u32, limit: u32) -> FolderPage {
        FolderPage::empty(offset, limit)
    }

    fn available_services(&self) -> Vec<ServiceDescriptor> {
        Vec::new()
    }

    fn scan_status(&self) -> ScanStatus {
        ScanStatus {
            scanning: false,
            progress: 100,
        }
    }

    fn recent(&self, offset: u32, limit: u32) -> FolderPage {
        FolderPage::empty(offset, limit)
    }

    fn clear_recent(&self) {}

    fn resolve_station(&self, _service: &str, _user: &str, id: &str) -> ResolvedMedia {
        ResolvedMedia {
            audiopath: id.to_string(),
        }
    }

    fn resolve_playlist(&self, path: &str, item: Option<&str>) -> ResolvedMedia {
        ResolvedMedia {
            audiopath: item.map(|i| i.to_string()).unwrap_or_else(|| path.to_string()),
        }
    }

    fn resolve_media_item(&self, id: &str, _parent: Option<&str>, _shuffle: Option<bool>) -> ResolvedMedia {
        ResolvedMedia {
            audiopath: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_provider_echoes_ids_as_resolved_audiopath() {
        let provider = NullProvider::new();
        let resolved = provider.resolve_media_item("library:local:track:ma:42", None, None);
        assert_eq!(resolved.audiopath, "library:local:track:ma:42");
    }

    #[test]
    fn null_provider_pages_are_empty_but_shaped() {
        let provider = NullProvider::new();
        let page = provider.get_radios(0, 50);
        assert!(page.items.is_empty());
        assert_eq!(page.limit, 50);
    }
}
