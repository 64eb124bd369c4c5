use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

const CANDIDATES: TableDefinition<&str, &str> =
    TableDefinition::new("candidates");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Persistent manifest of registered candidates and user settings.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(CANDIDATES)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Candidates --

    /// Register several candidates in a single transaction.
    pub fn batch_set_candidates(&self, entries: &[(String, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CANDIDATES)?;
            for (id, path) in entries {
                table.insert(id.as_str(), path.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_candidate(&self, id: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CANDIDATES)?;
        Ok(table.get(id)?.map(|v| v.value().to_string()))
    }

    pub fn remove_candidate(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(CANDIDATES)?;
            table.remove(id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// All `(candidate id, text path)` pairs, ordered by id.
    pub fn list_candidates(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CANDIDATES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn candidates_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.list_candidates().unwrap(), vec![]);
        assert_eq!(db.get_candidate("alice").unwrap(), None);

        db.batch_set_candidates(&[("alice".to_string(), "/cvs/alice.txt".to_string())])
            .unwrap();
        assert_eq!(
            db.get_candidate("alice").unwrap(),
            Some("/cvs/alice.txt".to_string())
        );

        assert!(db.remove_candidate("alice").unwrap());
        assert!(!db.remove_candidate("alice").unwrap());
        assert_eq!(db.get_candidate("alice").unwrap(), None);
    }

    #[test]
    fn candidates_listed_in_id_order() {
        let (_tmp, db) = test_db();
        db.batch_set_candidates(&[
            ("zoe".to_string(), "/z.txt".to_string()),
            ("adam".to_string(), "/a.txt".to_string()),
        ])
        .unwrap();

        let ids: Vec<_> = db
            .list_candidates()
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["adam", "zoe"]);
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert!(db.list_settings().unwrap().is_empty());
        db.set_setting("top_n", "3").unwrap();
        assert_eq!(
            db.list_settings().unwrap(),
            vec![("top_n".to_string(), "3".to_string())]
        );

        assert!(db.remove_setting("top_n").unwrap());
        assert!(!db.remove_setting("top_n").unwrap());
        assert!(db.list_settings().unwrap().is_empty());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.redb");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.batch_set_candidates(&[(
                "alice".to_string(),
                "/cvs/alice.txt".to_string(),
            )])
            .unwrap();
            db.set_setting("llm_model", "llama3.2:3b").unwrap();
        }

        {
            let db = ConfigDb::open(&path).unwrap();
            assert_eq!(
                db.get_candidate("alice").unwrap(),
                Some("/cvs/alice.txt".to_string())
            );
            assert_eq!(
                db.list_settings().unwrap(),
                vec![("llm_model".to_string(), "llama3.2:3b".to_string())]
            );
        }
    }
}
