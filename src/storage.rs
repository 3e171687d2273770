//! SQLite cache for image records and per-(query, page) membership

use crate::model::{
    ImageCounts, ImageDimensions, ImageId, ImageItem, ImageOwner, ImageUrls, PageMembership,
};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const ITEM_COLUMNS: &str = "i.id, i.tags, i.comments, i.likes, i.downloads, i.views,
    i.width, i.height, i.thumbnail_url, i.large_image_url, i.image_url,
    i.user_image_url, i.user_id, i.username, i.search_query";

/// SQLite cache store
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            -- Image records, replaced wholesale when the same id is fetched again
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY,
                tags TEXT NOT NULL,
                comments INTEGER NOT NULL DEFAULT 0,
                likes INTEGER NOT NULL DEFAULT 0,
                downloads INTEGER NOT NULL DEFAULT 0,
                views INTEGER NOT NULL DEFAULT 0,
                width INTEGER NOT NULL DEFAULT 0,
                height INTEGER NOT NULL DEFAULT 0,
                thumbnail_url TEXT NOT NULL,
                large_image_url TEXT,
                image_url TEXT,
                user_image_url TEXT,
                user_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                search_query TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Which images a query returned on which page (append-only)
            CREATE TABLE IF NOT EXISTS page_membership (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                page INTEGER NOT NULL,
                image_id INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_page_membership_entry
                ON page_membership(query, page, image_id);
            CREATE INDEX IF NOT EXISTS idx_page_membership_image ON page_membership(image_id);
            "#,
        )?;
        Ok(())
    }

    /// True if at least one membership row exists for (query, page)
    pub fn has_page(&self, query: &str, page: u32) -> Result<bool, StorageError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM page_membership WHERE query = ?1 AND page = ?2)",
            params![query, page],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// True if at least one membership row exists for (query, page + 1)
    pub fn has_next_page(&self, query: &str, page: u32) -> Result<bool, StorageError> {
        match page.checked_add(1) {
            Some(next) => self.has_page(query, next),
            None => Ok(false),
        }
    }

    /// Items recorded for (query, page), in insertion order
    pub fn get_items(&self, query: &str, page: u32) -> Result<Vec<ImageItem>, StorageError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS}
             FROM page_membership m
             JOIN images i ON i.id = m.image_id
             WHERE m.query = ?1 AND m.page = ?2
             ORDER BY m.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![query, page], row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Point lookup for the detail view
    pub fn get_item_by_id(&self, id: ImageId) -> Result<Option<ImageItem>, StorageError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM images i WHERE i.id = ?1");
        let result = self.conn.query_row(&sql, params![id], row_to_item);

        match result {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert the page's items and record their membership in one transaction
    pub fn put_page(
        &mut self,
        query: &str,
        page: u32,
        items: &[ImageItem],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        for item in items {
            tx.execute(
                "INSERT OR REPLACE INTO images (
                    id, tags, comments, likes, downloads, views, width, height,
                    thumbnail_url, large_image_url, image_url, user_image_url,
                    user_id, username, search_query
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    item.id,
                    item.tags,
                    item.counts.comments,
                    item.counts.likes,
                    item.counts.downloads,
                    item.counts.views,
                    item.dimensions.width,
                    item.dimensions.height,
                    item.urls.thumbnail,
                    item.urls.large,
                    item.urls.full,
                    item.urls.user_avatar,
                    item.owner.user_id,
                    item.owner.username,
                    item.search_query,
                ],
            )?;

            tx.execute(
                "INSERT OR IGNORE INTO page_membership (query, page, image_id) VALUES (?1, ?2, ?3)",
                params![query, page, item.id],
            )?;
        }

        tx.commit()?;
        debug!("Cached {} items for {:?} page {}", items.len(), query, page);
        Ok(())
    }

    /// Membership rows for (query, page), in insertion order
    pub fn memberships(&self, query: &str, page: u32) -> Result<Vec<PageMembership>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT query, page, image_id FROM page_membership
             WHERE query = ?1 AND page = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![query, page], |row| {
            Ok(PageMembership {
                query: row.get(0)?,
                page: row.get(1)?,
                image_id: row.get(2)?,
            })
        })?;

        let mut memberships = Vec::new();
        for row in rows {
            memberships.push(row?);
        }
        Ok(memberships)
    }

    /// Keep the `keep` most recently fetched queries and drop everything else.
    /// Whole queries are removed so cached pages never lose rows individually.
    /// At least one query is always kept. Returns the number of evicted queries.
    pub fn evict_queries(&mut self, keep: usize) -> Result<usize, StorageError> {
        let keep = keep.max(1);
        let tx = self.conn.transaction()?;

        let stale: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT query FROM page_membership
                 GROUP BY query
                 ORDER BY MAX(id) DESC
                 LIMIT -1 OFFSET ?1",
            )?;
            let rows = stmt.query_map(params![keep as i64], |row| row.get::<_, String>(0))?;
            let mut stale = Vec::new();
            for row in rows {
                stale.push(row?);
            }
            stale
        };

        for query in &stale {
            tx.execute("DELETE FROM page_membership WHERE query = ?1", params![query])?;
        }

        let orphans = tx.execute(
            "DELETE FROM images WHERE id NOT IN (SELECT image_id FROM page_membership)",
            [],
        )?;

        tx.commit()?;

        if !stale.is_empty() {
            debug!("Evicted {} queries ({} orphaned images)", stale.len(), orphans);
        }
        Ok(stale.len())
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<CacheStats, StorageError> {
        let item_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;

        let membership_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM page_membership", [], |row| row.get(0))?;

        let query_count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT query) FROM page_membership",
            [],
            |row| row.get(0),
        )?;

        Ok(CacheStats {
            item_count: item_count as usize,
            membership_count: membership_count as usize,
            query_count: query_count as usize,
        })
    }
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ImageItem> {
    Ok(ImageItem {
        id: row.get(0)?,
        tags: row.get(1)?,
        counts: ImageCounts {
            comments: row.get(2)?,
            likes: row.get(3)?,
            downloads: row.get(4)?,
            views: row.get(5)?,
        },
        dimensions: ImageDimensions {
            width: row.get(6)?,
            height: row.get(7)?,
        },
        urls: ImageUrls {
            thumbnail: row.get(8)?,
            large: row.get(9)?,
            full: row.get(10)?,
            user_avatar: row.get(11)?,
        },
        owner: ImageOwner {
            user_id: row.get(12)?,
            username: row.get(13)?,
        },
        search_query: row.get(14)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub item_count: usize,
    pub membership_count: usize,
    pub query_count: usize,
}
