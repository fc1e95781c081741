use crate::models::{encode_document, Entries};
use crate::{JsonIndex, Repository};
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Write the full document to a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, contents).with_context(|| format!("writing {}", path.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

fn snapshot<T: Serialize>(entries: &Entries<T>) -> Result<BTreeMap<String, Value>> {
    entries.iter().map(|(k, v)| -> Result<(String, Value)> { Ok((k.clone(), serde_json::to_value(v)?)) }).collect()
}

impl<T: Serialize + DeserializeOwned> JsonIndex<T> {
    fn save(&self, before: &BTreeMap<String, Value>, after: &BTreeMap<String, Value>, entries: &Entries<T>) -> Result<()> {
        write_atomic(&self.index_path(), &encode_document(entries, self.collection)?)?;
        if !self.entry_files { return Ok(()); }
        for (key, value) in after {
            if before.get(key) != Some(value) {
                write_atomic(&self.entry_path(key), &serde_json::to_string_pretty(value)?)?;
            }
        }
        for key in before.keys().filter(|k| !after.contains_key(*k)) {
            let p = self.entry_path(key);
            if p.exists() { std::fs::remove_file(&p).with_context(|| format!("removing {}", p.display()))?; }
        }
        Ok(())
    }
}

impl<T: Clone + Serialize + DeserializeOwned> Repository<T> for JsonIndex<T> {
    fn get(&self, key: &str) -> Option<T> {
        self.load().remove(key)
    }

    fn list(&self) -> Vec<T> {
        self.load().into_values().collect()
    }

    fn put(&self, key: &str, value: T) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.update(|entries| Ok(entries.remove(key).is_some()))
    }

    fn update<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Entries<T>) -> Result<R>,
    {
        let _guard = self.lock.lock();
        let mut entries = self.load_for_write()?;
        let before = snapshot(&entries)?;
        let out = f(&mut entries)?;
        let after = snapshot(&entries)?;
        if before != after {
            debug!(path = %self.index_path().display(), records = entries.len(), "saving index");
            self.save(&before, &after, &entries)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec { name: String }

    fn rec(n: &str) -> Rec { Rec { name: n.into() } }

    #[test]
    fn put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonIndex<Rec> = JsonIndex::open_or_create(dir.path().join("runs"), "runs").unwrap();
        store.put("b", rec("two")).unwrap();
        store.put("a", rec("one")).unwrap();
        assert_eq!(store.get("a"), Some(rec("one")));
        assert_eq!(store.list(), vec![rec("one"), rec("two")]);
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn entry_files_follow_index() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonIndex<Rec> = JsonIndex::open_or_create(dir.path(), "runs").unwrap().with_entry_files();
        store.put("x", rec("ex")).unwrap();
        let p = store.entry_path("x");
        let on_disk: Rec = serde_json::from_str(&std::fs::read_to_string(&p).unwrap()).unwrap();
        assert_eq!(on_disk, rec("ex"));
        store.delete("x").unwrap();
        assert!(!p.exists());
    }

    #[test]
    fn malformed_index_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonIndex<Rec> = JsonIndex::open_or_create(dir.path(), "rules").unwrap();
        std::fs::write(store.index_path(), "{ not json").unwrap();
        assert!(store.list().is_empty());
        store.put("k", rec("v")).unwrap();
        assert_eq!(store.list(), vec![rec("v")]);
    }

    #[test]
    fn unchanged_update_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonIndex<Rec> = JsonIndex::open_or_create(dir.path(), "runs").unwrap();
        let found = store.update(|e| Ok(e.contains_key("nope"))).unwrap();
        assert!(!found);
        assert!(!store.index_path().exists());
    }

    #[test]
    fn failed_closure_leaves_document_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonIndex<Rec> = JsonIndex::open_or_create(dir.path(), "runs").unwrap();
        store.put("a", rec("one")).unwrap();
        let res: Result<()> = store.update(|e| {
            e.clear();
            anyhow::bail!("rejected")
        });
        assert!(res.is_err());
        assert_eq!(store.get("a"), Some(rec("one")));
    }
}
