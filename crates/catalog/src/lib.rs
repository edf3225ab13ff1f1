//! Two reserved system heap tables (`__sys_tables`, `__sys_indexes`) holding table
//! and index metadata, an in-memory cache over them, and a lazy-loaded registry of
//! in-memory B+tree indexes backed by persisted `__idx__{table}__{index}` heap
//! tables. Grounded on `original_source/engine/sys_catalog.py` and
//! `engine/index_registry.py`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use adapter::StorageAdapter;
use btree::BPlusTree;
use common::{BufferPoolPolicy, Config, DbError, DbResult, Row, Value};
use heap::TableMeta;
use log::{debug, info};
use types::SqlType;

pub const SYS_TABLES: &str = "__sys_tables";
pub const SYS_INDEXES: &str = "__sys_indexes";
const INDEX_TABLE_PREFIX: &str = "__idx__";
const TABLE_FILE_EXT: &str = "mdb";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub struct TableDesc {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone)]
pub struct IndexDesc {
    pub table: String,
    pub name: String,
    pub column: String,
    pub unique: bool,
}

/// Every table lives in its own directory: `{data_dir}/{name}/{name}.mdb`
/// (spec section 6's persistent file layout).
fn table_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(name).join(format!("{name}.{TABLE_FILE_EXT}"))
}

fn index_table_name(table: &str, index: &str) -> String {
    format!("{INDEX_TABLE_PREFIX}{table}__{index}")
}

fn encode_columns(columns: &[ColumnDef]) -> DbResult<String> {
    let pairs: Vec<(String, String)> = columns
        .iter()
        .map(|c| (c.name.clone(), format!("{:?}", c.ty)))
        .collect();
    Ok(serde_json::to_string(&pairs)?)
}

fn decode_columns(json: &str) -> DbResult<Vec<ColumnDef>> {
    let pairs: Vec<(String, String)> = serde_json::from_str(json)?;
    Ok(pairs
        .into_iter()
        .filter_map(|(name, ty)| SqlType::parse(&ty).map(|ty| ColumnDef { name, ty }))
        .collect())
}

/// Catalog metadata store: table schemas and index descriptors, persisted across
/// two system heap tables and cached in memory for hot-path lookups.
pub struct SysCatalog {
    data_dir: PathBuf,
    page_size: u32,
    buffer_pool_capacity: usize,
    buffer_pool_policy: BufferPoolPolicy,
    tables: HashMap<String, TableDesc>,
    indexes: HashMap<String, HashMap<String, IndexDesc>>,
}

impl SysCatalog {
    /// Opens (creating if absent) the two system tables, loads their contents into
    /// memory, then runs a discovery pass for any table/index files on disk that
    /// were never registered (e.g. left over from a prior run, or created by a
    /// tool that wrote directly to `data_dir`).
    pub fn open(adapter: &mut StorageAdapter, cfg: &Config) -> DbResult<Self> {
        std::fs::create_dir_all(&cfg.data_dir)?;
        let mut cat = SysCatalog {
            data_dir: cfg.data_dir.clone(),
            page_size: cfg.page_size,
            buffer_pool_capacity: cfg.buffer_pool_capacity,
            buffer_pool_policy: cfg.buffer_pool_policy,
            tables: HashMap::new(),
            indexes: HashMap::new(),
        };
        cat.open_sys_table(adapter, SYS_TABLES)?;
        cat.open_sys_table(adapter, SYS_INDEXES)?;
        cat.load_cache(adapter)?;
        cat.discover_unregistered(adapter)?;
        Ok(cat)
    }

    /// Creates `{data_dir}/{name}/` if needed and opens `{name}.mdb` inside it.
    fn open_table_dir(&self, adapter: &mut StorageAdapter, name: &str) -> DbResult<()> {
        std::fs::create_dir_all(self.data_dir.join(name))?;
        adapter.open_table(
            &table_path(&self.data_dir, name),
            self.page_size,
            self.buffer_pool_capacity,
            self.buffer_pool_policy,
            TableMeta::default(),
        )
    }

    fn open_sys_table(&self, adapter: &mut StorageAdapter, name: &str) -> DbResult<()> {
        self.open_table_dir(adapter, name)
    }

    fn load_cache(&mut self, adapter: &mut StorageAdapter) -> DbResult<()> {
        for row in adapter.scan_rows(&table_path(&self.data_dir, SYS_TABLES))? {
            let name = text_at(&row, 0)?;
            let columns = decode_columns(&text_at(&row, 1)?)?;
            self.tables.insert(name.clone(), TableDesc { name, columns });
        }
        for row in adapter.scan_rows(&table_path(&self.data_dir, SYS_INDEXES))? {
            let table = text_at(&row, 0)?;
            let name = text_at(&row, 1)?;
            let column = text_at(&row, 2)?;
            let unique = matches!(row.values.get(3), Some(Value::Int(1)));
            self.indexes.entry(table.clone()).or_default().insert(
                name.clone(),
                IndexDesc {
                    table,
                    name,
                    column,
                    unique,
                },
            );
        }
        Ok(())
    }

    /// Back-fills `__sys_tables`/`__sys_indexes` with any `{name}/{name}.mdb`
    /// table directories already sitting in `data_dir` that the in-memory cache
    /// doesn't know about. Supplemental feature grounded on the original's
    /// `_discover_existing_tables`/`_discover_existing_indexes`.
    fn discover_unregistered(&mut self, adapter: &mut StorageAdapter) -> DbResult<()> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(stem) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !path.join(format!("{stem}.{TABLE_FILE_EXT}")).is_file() {
                continue;
            }
            if stem == SYS_TABLES || stem == SYS_INDEXES {
                continue;
            }
            if let Some(rest) = stem.strip_prefix(INDEX_TABLE_PREFIX) {
                let Some((table, index)) = rest.split_once("__") else {
                    continue;
                };
                if self
                    .indexes
                    .get(table)
                    .is_some_and(|m| m.contains_key(index))
                {
                    continue;
                }
                info!("discovered unregistered index file {stem}, back-filling catalog");
                self.register_index(adapter, table, index, "", false)?;
            } else {
                if self.tables.contains_key(stem) {
                    continue;
                }
                info!("discovered unregistered table file {stem}, back-filling catalog");
                self.register_table(adapter, stem, Vec::new())?;
            }
        }
        Ok(())
    }

    fn register_table(
        &mut self,
        adapter: &mut StorageAdapter,
        name: &str,
        columns: Vec<ColumnDef>,
    ) -> DbResult<()> {
        let row = Row::new(vec![
            Value::Text(name.to_string()),
            Value::Text(encode_columns(&columns)?),
        ]);
        adapter.insert_row(&table_path(&self.data_dir, SYS_TABLES), &row)?;
        self.tables.insert(
            name.to_string(),
            TableDesc {
                name: name.to_string(),
                columns,
            },
        );
        Ok(())
    }

    fn register_index(
        &mut self,
        adapter: &mut StorageAdapter,
        table: &str,
        name: &str,
        column: &str,
        unique: bool,
    ) -> DbResult<()> {
        let row = Row::new(vec![
            Value::Text(table.to_string()),
            Value::Text(name.to_string()),
            Value::Text(column.to_string()),
            Value::Int(unique as i64),
        ]);
        adapter.insert_row(&table_path(&self.data_dir, SYS_INDEXES), &row)?;
        self.indexes.entry(table.to_string()).or_default().insert(
            name.to_string(),
            IndexDesc {
                table: table.to_string(),
                name: name.to_string(),
                column: column.to_string(),
                unique,
            },
        );
        Ok(())
    }

    /// Creates a new table: opens its data file and registers its schema.
    pub fn create_table(
        &mut self,
        adapter: &mut StorageAdapter,
        name: &str,
        columns: Vec<ColumnDef>,
    ) -> DbResult<()> {
        if self.tables.contains_key(name) {
            return Err(DbError::TableExists(name.to_string()));
        }
        self.open_table_dir(adapter, name)?;
        self.register_table(adapter, name, columns)
    }

    pub fn get_table(&self, name: &str) -> DbResult<&TableDesc> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn list_tables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        table_path(&self.data_dir, name)
    }

    pub fn index_table_path(&self, table: &str, index: &str) -> PathBuf {
        table_path(&self.data_dir, &index_table_name(table, index))
    }

    /// Reopens a table's handle after `adapter.clear_table` force-released it
    /// (spec section 4.5/4.7): `clear_table` deletes the file and invalidates the
    /// pool entry, so callers that write to the same path afterward must reopen.
    pub fn reopen_table(&self, adapter: &mut StorageAdapter, name: &str) -> DbResult<()> {
        self.open_table_dir(adapter, name)
    }

    /// Same as [`Self::reopen_table`] but for an index's heap table.
    pub fn reopen_index_table(
        &self,
        adapter: &mut StorageAdapter,
        table: &str,
        index_name: &str,
    ) -> DbResult<()> {
        self.open_table_dir(adapter, &index_table_name(table, index_name))
    }

    pub fn add_index(
        &mut self,
        adapter: &mut StorageAdapter,
        table: &str,
        index_name: &str,
        column: &str,
        unique: bool,
    ) -> DbResult<()> {
        if !self.tables.contains_key(table) {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        if self
            .indexes
            .get(table)
            .is_some_and(|m| m.contains_key(index_name))
        {
            return Err(DbError::IndexExists {
                table: table.to_string(),
                index: index_name.to_string(),
            });
        }
        self.open_table_dir(adapter, &index_table_name(table, index_name))?;
        self.register_index(adapter, table, index_name, column, unique)
    }

    /// Drops an index: clears its persisted heap table and its catalog entries.
    pub fn drop_index(
        &mut self,
        adapter: &mut StorageAdapter,
        table: &str,
        index_name: &str,
    ) -> DbResult<()> {
        let path = self.index_table_path(table, index_name);
        adapter.clear_table(&path)?;
        if let Some(m) = self.indexes.get_mut(table) {
            if m.remove(index_name).is_none() {
                return Err(DbError::IndexNotFound {
                    table: table.to_string(),
                    index: index_name.to_string(),
                });
            }
        } else {
            return Err(DbError::IndexNotFound {
                table: table.to_string(),
                index: index_name.to_string(),
            });
        }
        Ok(())
    }

    pub fn list_indexes(&self, table: &str) -> Vec<&IndexDesc> {
        self.indexes
            .get(table)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    pub fn find_index_by_column(&self, table: &str, column: &str) -> Option<&IndexDesc> {
        self.indexes
            .get(table)?
            .values()
            .find(|d| d.column == column)
    }
}

fn text_at(row: &Row, idx: usize) -> DbResult<String> {
    match row.values.get(idx) {
        Some(Value::Text(s)) => Ok(s.clone()),
        other => Err(DbError::EncodingError(serde_json::Error::io(
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected text column at index {idx}, found {other:?}"),
            ),
        ))),
    }
}

/// Lazily-loaded in-memory B+tree per `(table, index)`, rebuilt on demand from its
/// persisted index heap table. Grounded on `original_source/engine/index_registry.py`.
pub struct IndexRegistry {
    order: usize,
    trees: HashMap<(String, String), BPlusTree>,
    loaded: HashMap<(String, String), bool>,
}

impl IndexRegistry {
    pub fn new(order: usize) -> Self {
        IndexRegistry {
            order,
            trees: HashMap::new(),
            loaded: HashMap::new(),
        }
    }

    /// Marks an index's in-memory tree stale; the next `ensure_loaded` rebuilds it
    /// from storage. Used after DML writes that rewrite a table's index table.
    pub fn mark_unloaded(&mut self, table: &str, index: &str) {
        self.loaded
            .insert((table.to_string(), index.to_string()), false);
    }

    /// Loads (or reuses an already-loaded) tree for `(table, index)` from its
    /// persisted heap table, then returns it for querying.
    pub fn ensure_loaded(
        &mut self,
        adapter: &mut StorageAdapter,
        catalog: &SysCatalog,
        table: &str,
        index: &str,
    ) -> DbResult<&BPlusTree> {
        let key = (table.to_string(), index.to_string());
        if self.loaded.get(&key).copied().unwrap_or(false) {
            return Ok(self.trees.get(&key).unwrap());
        }
        let path = catalog.index_table_path(table, index);
        let mut tree = BPlusTree::new(self.order);
        for row in adapter.scan_rows(&path)? {
            let key_val = row
                .values
                .first()
                .cloned()
                .unwrap_or(Value::Null);
            let row_json = match row.values.get(1) {
                Some(Value::Text(s)) => s.clone(),
                _ => "[]".to_string(),
            };
            let values: Vec<Value> = serde_json::from_str(&row_json)?;
            tree.insert(key_val, Row::new(values));
        }
        debug!("loaded index {table}.{index} ({} entries)", tree.iter_all().len());
        self.trees.insert(key.clone(), tree);
        self.loaded.insert(key, true);
        Ok(self.trees.get(&(table.to_string(), index.to_string())).unwrap())
    }

    /// Appends one entry to both the in-memory tree and its persisted heap table.
    pub fn insert(
        &mut self,
        adapter: &mut StorageAdapter,
        catalog: &SysCatalog,
        table: &str,
        index: &str,
        key: Value,
        row: Row,
    ) -> DbResult<()> {
        self.ensure_loaded(adapter, catalog, table, index)?;
        let path = catalog.index_table_path(table, index);
        let persisted = Row::new(vec![
            key.clone(),
            Value::Text(serde_json::to_string(&row.values)?),
        ]);
        adapter.insert_row(&path, &persisted)?;
        let entry = self
            .trees
            .get_mut(&(table.to_string(), index.to_string()))
            .expect("just ensured loaded");
        entry.insert(key, row);
        Ok(())
    }
}
