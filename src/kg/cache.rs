use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    fs,
    hash::{Hash, Hasher},
    path::PathBuf,
    sync::Mutex,
};

use anyhow::{Context, Result};
use serde_json::Value;

/// Persist after this many writes. Crashing between flushes loses at most
/// one batch; the file itself is always replaced atomically.
const FLUSH_EVERY: usize = 10;

/// Durable content-addressed cache for KG responses.
///
/// Keys are a stable hash of the normalized query text plus a mode tag, so a
/// probe and a full execution of the same text never collide. The store is a
/// single JSON object on disk; corrupt files are discarded on load, never
/// repaired.
pub struct QueryCache {
    path: PathBuf,
    state: Mutex<CacheState>,
}

struct CacheState {
    entries: HashMap<String, Value>,
    pending_writes: usize,
}

impl QueryCache {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create cache directory {}", parent.display()))?;
        }
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, Value>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "discarding corrupt cache file: {e}");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        tracing::info!(path = %path.display(), entries = entries.len(), "query cache opened");
        Ok(Self {
            path,
            state: Mutex::new(CacheState {
                entries,
                pending_writes: 0,
            }),
        })
    }

    pub fn get(&self, mode: &str, query: &str) -> Option<Value> {
        let key = cache_key(mode, query);
        let state = self.state.lock().ok()?;
        state.entries.get(&key).cloned()
    }

    pub fn put(&self, mode: &str, query: &str, value: Value) {
        let key = cache_key(mode, query);
        let should_flush = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.entries.insert(key, value);
            state.pending_writes += 1;
            state.pending_writes >= FLUSH_EVERY
        };
        if should_flush {
            if let Err(e) = self.flush() {
                tracing::warn!("cache flush failed: {e}");
            }
        }
    }

    /// Write the whole store to disk via a temp file + rename, so a crash
    /// mid-write never leaves a half-written cache behind.
    pub fn flush(&self) -> Result<()> {
        let (snapshot, had_pending) = {
            let Ok(mut state) = self.state.lock() else {
                return Ok(());
            };
            let had = state.pending_writes > 0;
            state.pending_writes = 0;
            (serde_json::to_string(&state.entries)?, had)
        };
        if !had_pending {
            return Ok(());
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, snapshot)
            .with_context(|| format!("cannot write cache temp file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("cannot replace cache file {}", self.path.display()))?;
        Ok(())
    }
}

impl Drop for QueryCache {
    fn drop(&mut self) {
        // Force a final flush even if the last batch was small.
        if let Ok(state) = self.state.get_mut() {
            state.pending_writes += 1;
        }
        let _ = self.flush();
    }
}

// ── Key derivation ────────────────────────────────────────────────────────────

fn cache_key(mode: &str, query: &str) -> String {
    let normalized = normalize_query(query);
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    format!("{mode}:{:016x}", hasher.finish())
}

/// Collapse whitespace and sort the members of every `VALUES` block so that
/// formatting and set ordering do not perturb the key.
fn normalize_query(query: &str) -> String {
    let collapsed: Vec<&str> = query.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(collapsed.len());
    let mut i = 0;
    while i < collapsed.len() {
        let tok = collapsed[i];
        out.push(tok.to_string());
        // VALUES ?var { a b c } — sort a b c.
        if tok.eq_ignore_ascii_case("VALUES") && i + 2 < collapsed.len() && collapsed[i + 2] == "{"
        {
            out.push(collapsed[i + 1].to_string());
            out.push("{".to_string());
            let mut j = i + 3;
            let mut members = Vec::new();
            while j < collapsed.len() && collapsed[j] != "}" {
                members.push(collapsed[j].to_string());
                j += 1;
            }
            members.sort();
            out.extend(members);
            if j < collapsed.len() {
                out.push("}".to_string());
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whitespace_does_not_perturb_the_key() {
        let a = "SELECT ?item WHERE { ?item wdt:P31 wd:Q11424 . }";
        let b = "SELECT   ?item\nWHERE {\n  ?item wdt:P31 wd:Q11424 .\n}";
        assert_eq!(cache_key("sparql", a), cache_key("sparql", b));
    }

    #[test]
    fn values_order_does_not_perturb_the_key() {
        let a = "SELECT ?item WHERE { VALUES ?item { wd:Q1 wd:Q2 wd:Q3 } ?item wdt:P31 ?v }";
        let b = "SELECT ?item WHERE { VALUES ?item { wd:Q3 wd:Q1 wd:Q2 } ?item wdt:P31 ?v }";
        assert_eq!(cache_key("sparql", a), cache_key("sparql", b));
    }

    #[test]
    fn mode_tag_separates_probe_from_full() {
        let q = "SELECT ?item WHERE { ?item wdt:P31 wd:Q11424 . }";
        assert_ne!(cache_key("probe", q), cache_key("sparql", q));
    }

    #[test]
    fn put_get_roundtrip_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        {
            let cache = QueryCache::open(&path).expect("open");
            cache.put("sparql", "SELECT 1", json!([{"item": {"type": "uri", "value": "x"}}]));
            cache.flush().expect("flush");
        }
        let reopened = QueryCache::open(&path).expect("reopen");
        assert!(reopened.get("sparql", "SELECT  1").is_some());
        assert!(reopened.get("probe", "SELECT 1").is_none());
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").expect("write");
        let cache = QueryCache::open(&path).expect("open survives corruption");
        assert!(cache.get("sparql", "anything").is_none());
    }
}
