use crate::{ensure_finished, sort_records, GroupFilter, PersistenceError, Result, TaskStore};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::PathBuf;
use taskq_core::{Task, TaskId};
use tracing::{debug, info};

/// Configuration for the RocksDB task store
#[derive(Debug, Clone)]
pub struct RocksStoreConfig {
    pub data_dir: PathBuf,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        RocksStoreConfig {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Column family names
const CF_TASKS: &str = "tasks";
const CF_GROUPS: &str = "groups";

/// Durable task store backed by RocksDB.
///
/// Records live in `tasks` keyed by task id. The `groups` family indexes
/// group membership under `group \0 task_id` with empty values.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create the store
    pub fn open(config: RocksStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.data_dir.join("results");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TASKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_GROUPS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, db_path, cf_descriptors)?;

        info!("Opened task store at {:?}", config.data_dir);
        Ok(RocksStore { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PersistenceError::Other(format!("CF {} not found", name)))
    }

    fn group_prefix(group: &str) -> Vec<u8> {
        let mut prefix = group.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    fn group_key(group: &str, id: &TaskId) -> Vec<u8> {
        let mut key = Self::group_prefix(group);
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// Task ids indexed under `group`
    fn group_members(&self, group: &str) -> Result<Vec<TaskId>> {
        let groups_cf = self.cf(CF_GROUPS)?;
        let prefix = Self::group_prefix(group);

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(groups_cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id = TaskId::from_slice(&key[prefix.len()..])
                .map_err(|e| PersistenceError::Other(format!("Corrupt group index: {}", e)))?;
            ids.push(id);
        }
        Ok(ids)
    }
}

impl TaskStore for RocksStore {
    fn save(&self, task: &Task) -> Result<()> {
        ensure_finished(task)?;
        let tasks_cf = self.cf(CF_TASKS)?;
        let groups_cf = self.cf(CF_GROUPS)?;

        let mut batch = WriteBatch::default();

        // A replaced record may have moved groups
        if let Some(previous) = self.get(&task.id)? {
            if let Some(group) = previous.group.filter(|g| Some(g) != task.group.as_ref()) {
                batch.delete_cf(groups_cf, Self::group_key(&group, &task.id));
            }
        }

        batch.put_cf(tasks_cf, task.id.as_bytes(), task.to_bytes()?);
        if let Some(group) = &task.group {
            batch.put_cf(groups_cf, Self::group_key(group, &task.id), b"");
        }
        self.db.write(batch)?;

        debug!("Saved task {} ({})", task.id, task.status().as_str());
        Ok(())
    }

    fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        let tasks_cf = self.cf(CF_TASKS)?;
        match self.db.get_cf(tasks_cf, id.as_bytes())? {
            Some(value) => Ok(Some(Task::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    fn query(&self, group: &str, filter: GroupFilter) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for id in self.group_members(group)? {
            if let Some(task) = self.get(&id)? {
                if filter.matches(&task) {
                    tasks.push(task);
                }
            }
        }
        sort_records(&mut tasks);
        Ok(tasks)
    }

    fn delete_task(&self, id: &TaskId) -> Result<bool> {
        let task = match self.get(id)? {
            Some(task) => task,
            None => return Ok(false),
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_TASKS)?, id.as_bytes());
        if let Some(group) = &task.group {
            batch.delete_cf(self.cf(CF_GROUPS)?, Self::group_key(group, id));
        }
        self.db.write(batch)?;

        debug!("Deleted task {}", id);
        Ok(true)
    }

    fn delete_group(&self, group: &str) -> Result<usize> {
        let ids = self.group_members(group)?;
        let tasks_cf = self.cf(CF_TASKS)?;
        let groups_cf = self.cf(CF_GROUPS)?;

        let mut batch = WriteBatch::default();
        for id in &ids {
            batch.delete_cf(tasks_cf, id.as_bytes());
            batch.delete_cf(groups_cf, Self::group_key(group, id));
        }
        if !ids.is_empty() {
            self.db.write(batch)?;
            info!("Deleted {} tasks in group {}", ids.len(), group);
        }

        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failed, ok};
    use taskq_core::Value;
    use tempfile::TempDir;

    fn open(temp_dir: &TempDir) -> RocksStore {
        let config = RocksStoreConfig {
            data_dir: temp_dir.path().to_path_buf(),
        };
        RocksStore::open(config).unwrap()
    }

    #[test]
    fn test_save_and_get_task() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);

        let task = ok(None, 7, 0);
        store.save(&task).unwrap();

        let retrieved = store.get(&task.id).unwrap().unwrap();
        assert_eq!(retrieved.id, task.id);
        assert_eq!(retrieved.result, Some(Value::from(7)));
        assert_eq!(retrieved.success, Some(true));
    }

    #[test]
    fn test_group_query_order_and_filters() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);

        // Saved out of order on purpose
        store.save(&ok(Some("g"), 2, 20)).unwrap();
        store.save(&failed(Some("g"), 30)).unwrap();
        store.save(&ok(Some("g"), 1, 10)).unwrap();
        store.save(&ok(Some("g2"), 9, 0)).unwrap();

        let all = store.query("g", GroupFilter::All).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].result, Some(Value::from(1)));
        assert_eq!(all[1].result, Some(Value::from(2)));

        assert_eq!(store.query("g", GroupFilter::Successes).unwrap().len(), 2);
        assert_eq!(store.query("g", GroupFilter::Failures).unwrap().len(), 1);
        assert!(store.query("missing", GroupFilter::All).unwrap().is_empty());
    }

    #[test]
    fn test_group_prefix_does_not_leak() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);

        store.save(&ok(Some("ab"), 1, 0)).unwrap();
        store.save(&ok(Some("abc"), 2, 0)).unwrap();

        assert_eq!(store.query("ab", GroupFilter::All).unwrap().len(), 1);
        assert_eq!(store.delete_group("ab").unwrap(), 1);
        assert_eq!(store.query("abc", GroupFilter::All).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_task_and_group() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);

        let single = ok(Some("g"), 1, 0);
        store.save(&single).unwrap();
        store.save(&ok(Some("g"), 2, 0)).unwrap();

        assert!(store.delete_task(&single.id).unwrap());
        assert!(store.get(&single.id).unwrap().is_none());
        assert_eq!(store.query("g", GroupFilter::All).unwrap().len(), 1);

        assert_eq!(store.delete_group("g").unwrap(), 1);
        assert_eq!(store.delete_group("g").unwrap(), 0);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        let task = ok(Some("g"), 5, 0);

        {
            let store = open(&temp_dir);
            store.save(&task).unwrap();
        }

        let store = open(&temp_dir);
        assert!(store.get(&task.id).unwrap().is_some());
        assert_eq!(store.query("g", GroupFilter::All).unwrap().len(), 1);
    }
}
