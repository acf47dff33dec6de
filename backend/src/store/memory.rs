//! In-memory stores, optionally backed by a JSON file.
//!
//! Used by the CLI, the server and tests. With a file, the whole table is
//! rewritten after every change and reloaded on startup.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use super::product::{ProductChanges, PRODUCT_FIELDS};
use super::{DestinationStore, LogStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{FieldName, ImportLogEntry, ImportRecord, Product};

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Load `path`, or the empty value when it does not exist yet.
fn load_json<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(unavailable(format!("{}: {}", path.display(), e))),
    }
}

async fn save_json<T: Serialize>(path: Option<&Path>, value: &T) -> StoreResult<()> {
    let Some(path) = path else {
        return Ok(());
    };
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(unavailable)?;
    }
    let content = serde_json::to_string_pretty(value).map_err(unavailable)?;
    tokio::fs::write(path, content).await.map_err(unavailable)
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductTable {
    next_id: u64,
    by_sku: BTreeMap<String, Product>,
}

/// Products keyed by SKU.
#[derive(Debug, Default)]
pub struct MemoryProductStore {
    table: RwLock<ProductTable>,
    file: Option<PathBuf>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store. Later duplicates of a SKU replace earlier ones.
    pub fn with_products(products: Vec<Product>) -> Self {
        let next_id = products.iter().map(|p| p.id).max().unwrap_or(0);
        let by_sku = products.into_iter().map(|p| (p.sku.clone(), p)).collect();
        Self {
            table: RwLock::new(ProductTable { next_id, by_sku }),
            file: None,
        }
    }

    /// Products saved in `path`, loading the ones already there.
    pub fn with_file(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let table: ProductTable = load_json(&path)?;
        info!(count = table.by_sku.len(), file = %path.display(), "products loaded");
        Ok(Self {
            table: RwLock::new(table),
            file: Some(path),
        })
    }

    /// All products ordered by id.
    pub async fn all(&self) -> Vec<Product> {
        let table = self.table.read().await;
        let mut products: Vec<Product> = table.by_sku.values().cloned().collect();
        products.sort_by_key(|p| p.id);
        products
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.by_sku.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DestinationStore for MemoryProductStore {
    type Entity = Product;

    fn key_field(&self) -> &str {
        "sku"
    }

    fn fields(&self) -> Vec<FieldName> {
        PRODUCT_FIELDS.iter().map(|f| FieldName::from(*f)).collect()
    }

    async fn find_by_key(&self, key: &str) -> StoreResult<Product> {
        self.table
            .read()
            .await
            .by_sku
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, record: &ImportRecord) -> StoreResult<Product> {
        let changes = ProductChanges::from_record(record)?;
        let mut table = self.table.write().await;

        if let Some(sku) = changes.sku.as_deref() {
            if table.by_sku.contains_key(sku) {
                return Err(StoreError::Constraint(format!("duplicate sku '{}'", sku)));
            }
        }

        let product = changes.into_product(table.next_id + 1)?;
        let previous_id = table.next_id;
        table.next_id = product.id;
        table.by_sku.insert(product.sku.clone(), product.clone());

        if let Err(e) = save_json(self.file.as_deref(), &*table).await {
            table.by_sku.remove(&product.sku);
            table.next_id = previous_id;
            return Err(e);
        }
        Ok(product)
    }

    async fn update(&self, entity: Product, record: &ImportRecord) -> StoreResult<Product> {
        let changes = ProductChanges::from_record(record)?;
        let mut table = self.table.write().await;

        let original = entity.clone();
        let old_sku = entity.sku.clone();
        let mut product = entity;
        changes.apply(&mut product);

        if product.sku != old_sku && table.by_sku.contains_key(&product.sku) {
            return Err(StoreError::Constraint(format!(
                "duplicate sku '{}'",
                product.sku
            )));
        }

        table.by_sku.remove(&old_sku);
        table.by_sku.insert(product.sku.clone(), product.clone());

        if let Err(e) = save_json(self.file.as_deref(), &*table).await {
            table.by_sku.remove(&product.sku);
            table.by_sku.insert(old_sku, original);
            return Err(e);
        }
        Ok(product)
    }
}

/// Run log kept in memory.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: RwLock<Vec<ImportLogEntry>>,
    file: Option<PathBuf>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run log saved in `path`, loading the entries already there.
    pub fn with_file(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries: Vec<ImportLogEntry> = load_json(&path)?;
        Ok(Self {
            entries: RwLock::new(entries),
            file: Some(path),
        })
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn create_run_record(&self, author: Option<&str>, file_path: &Path) -> StoreResult<ImportLogEntry> {
        let mut entries = self.entries.write().await;
        let entry = ImportLogEntry {
            id: entries.len() as u64 + 1,
            author: author.map(str::to_string),
            file_path: file_path.to_path_buf(),
            created_at: Utc::now(),
        };
        entries.push(entry.clone());

        if let Err(e) = save_json(self.file.as_deref(), &*entries).await {
            entries.pop();
            return Err(e);
        }
        Ok(entry)
    }

    async fn list(&self) -> StoreResult<Vec<ImportLogEntry>> {
        Ok(self.entries.read().await.iter().rev().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(sku: &str, name: &str, price: &str) -> ImportRecord {
        ImportRecord::new()
            .with("sku", sku)
            .with("name", name)
            .with("price", price)
    }

    #[tokio::test]
    async fn test_create_then_find_then_update() {
        let store = MemoryProductStore::new();
        assert!(matches!(
            store.find_by_key("ABC123").await,
            Err(StoreError::NotFound(_))
        ));

        let created = store.create(&row("ABC123", "Mug", "4")).await.unwrap();
        assert_eq!(created.id, 1);

        let found = store.find_by_key("ABC123").await.unwrap();
        let updated = store
            .update(found, &ImportRecord::new().with("sku", "ABC123").with("price", "5.25"))
            .await
            .unwrap();
        assert_eq!(updated.name, "Mug");
        assert_eq!(updated.price_cents, 525);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_constraint_error() {
        let store = MemoryProductStore::new();
        store.create(&row("A", "One", "1")).await.unwrap();
        let err = store.create(&row("A", "Two", "2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_update_rekeys_sku() {
        let store = MemoryProductStore::with_products(vec![Product {
            id: 41,
            name: "Bolt".into(),
            sku: "B-1".into(),
            price_cents: 10,
        }]);
        let found = store.find_by_key("B-1").await.unwrap();
        store
            .update(found, &ImportRecord::new().with("sku", "B-2"))
            .await
            .unwrap();

        assert!(store.find_by_key("B-1").await.is_err());
        assert_eq!(store.find_by_key("B-2").await.unwrap().id, 41);

        let next = store.create(&row("C-1", "Cog", "3")).await.unwrap();
        assert_eq!(next.id, 42);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_store_unchanged() {
        let store = MemoryProductStore::new();
        assert!(store.create(&ImportRecord::new().with("sku", "X")).await.is_err());
        assert!(store.is_empty().await);
        assert_eq!(store.create(&row("Y", "Yo", "1")).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_file_backed_stores_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let products = dir.path().join("store/products.json");
        let logs = dir.path().join("store/import-logs.json");

        {
            let store = MemoryProductStore::with_file(&products).unwrap();
            store.create(&row("A", "One", "1")).await.unwrap();
            let found = store.find_by_key("A").await.unwrap();
            store.update(found, &ImportRecord::new().with("sku", "A").with("name", "Uno")).await.unwrap();

            let log = MemoryLogStore::with_file(&logs).unwrap();
            log.create_run_record(Some("ada"), Path::new("/tmp/a.csv")).await.unwrap();
        }

        let store = MemoryProductStore::with_file(&products).unwrap();
        assert_eq!(store.find_by_key("A").await.unwrap().name, "Uno");
        assert_eq!(store.create(&row("B", "Two", "2")).await.unwrap().id, 2);

        let log = MemoryLogStore::with_file(&logs).unwrap();
        assert_eq!(log.list().await.unwrap()[0].author.as_deref(), Some("ada"));
        assert_eq!(
            log.create_run_record(None, Path::new("/tmp/b.csv")).await.unwrap().id,
            2
        );
    }

    #[tokio::test]
    async fn test_unwritable_file_is_unavailable_and_rolls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let table_dir = dir.path().join("store");
        let store = MemoryProductStore::with_file(table_dir.join("products.json")).unwrap();
        std::fs::write(&table_dir, "not a directory").unwrap();

        let err = store.create(&row("A", "One", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("products.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            MemoryProductStore::with_file(&path),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_log_store_newest_first() {
        let logs = MemoryLogStore::new();
        logs.create_run_record(Some("ada"), Path::new("/tmp/a.csv")).await.unwrap();
        logs.create_run_record(None, Path::new("/tmp/b.csv")).await.unwrap();

        let entries = logs.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_path, Path::new("/tmp/b.csv"));
        assert_eq!(entries[1].author.as_deref(), Some("ada"));
    }
}
