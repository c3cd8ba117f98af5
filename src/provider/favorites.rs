//! Per-zone room favourites. In-memory only; the dispatcher's favourites
//! routes are the sole mutators. No persistence is implied by the route
//! table, so a restart resets the store.

use tokio::sync::RwLock;

use crate::zone::PlayerId;

#[derive(Debug, Clone)]
pub struct RoomFavorite {
    pub id: String,
    pub zone: PlayerId,
    pub provider: String,
    pub title: String,
    pub audiopath: String,
    pub coverurl: Option<String>,
    pub position: u32,
}

pub struct FavoritesStore {
    items: RwLock<Vec<RoomFavorite>>,
}

impl FavoritesStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }

    pub async fn list(&self, zone: PlayerId, offset: u32, limit: u32) -> (Vec<RoomFavorite>, u32) {
        let guard = self.items.read().await;
        let mut matching: Vec<RoomFavorite> = guard.iter().filter(|f| f.zone == zone).cloned().collect();
        matching.sort_by_key(|f| f.position);
        let total = matching.len() as u32;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        (page, total)
    }

    pub async fn add(&self, favorite: RoomFavorite) {
        self.items.write().await.push(favorite);
    }

    pub async fn delete(&self, id: &str) {
        self.items.write().await.retain(|f| f.id != id);
    }

    pub async fn reorder(&self, zone: PlayerId, ordered_ids: &[String]) {
        let mut guard = self.items.write().await;
        for (position, id) in ordered_ids.iter().enumerate() {
            if let Some(item) = guard.iter_mut().find(|f| f.zone == zone && &f.id == id) {
                item.position = position as u32;
            }
        }
    }

    pub async fn copy(&self, from_zone: PlayerId, to_zone: PlayerId) {
        let copies: Vec<RoomFavorite> = {
            let guard = self.items.read().await;
            guard
                .iter()
                .filter(|f| f.zone == from_zone)
                .cloned()
                .map(|mut f| {
                    f.zone = to_zone;
                    f
                })
                .collect()
        };
        self.items.write().await.extend(copies);
    }

    pub async fn set_id(&self, old_id: &str, new_id: &str) {
        let mut guard = self.items.write().await;
        if let Some(item) = guard.iter_mut().find(|f| f.id == old_id) {
            item.id = new_id.to_string();
        }
    }

    pub async fn get(&self, id: &str) -> Option<RoomFavorite> {
        self.items.read().await.iter().find(|f| f.id == id).cloned()
    }
}

impl Default for FavoritesStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fav(id: &str, zone: u32, position: u32) -> RoomFavorite {
        RoomFavorite {
            id: id.to_string(),
            zone: PlayerId(zone),
            provider: "library".into(),
            title: id.to_string(),
            audiopath: format!("library:local:track:x:{id}"),
            coverurl: None,
            position,
        }
    }

    #[tokio::test]
    async fn list_is_paginated_and_ordered_by_position() {
        let store = FavoritesStore::new();
        store.add(fav("b", 1, 1)).await;
        store.add(fav("a", 1, 0)).await;
        let (page, total) = store.list(PlayerId(1), 0, 10).await;
        assert_eq!(total, 2);
        assert_eq!(page[0].id, "a");
    }

    #[tokio::test]
    async fn copy_duplicates_into_target_zone() {
        let store = FavoritesStore::new();
        store.add(fav("a", 1, 0)).await;
        store.copy(PlayerId(1), PlayerId(2)).await;
        let (page, _) = store.list(PlayerId(2), 0, 10).await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].zone, PlayerId(2));
    }
}
