//! Layered configuration store
//!
//! A [`ConfigStore`] merges three precedence layers, highest first:
//! prefixed environment variables, the loaded configuration file, and
//! programmatic defaults. The environment is consulted on every lookup,
//! so variables exported after the file was loaded still win.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::loader::{self, ConfigError};
use crate::watcher;

/// Notification emitted after the watched file was re-read successfully
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The changed configuration file
    pub path: PathBuf,
}

type ChangeHandler = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

struct State {
    env_prefix: String,
    defaults: Value,
    file: Value,
    source: Option<PathBuf>,
}

struct Shared {
    state: RwLock<State>,
    handlers: Mutex<Vec<ChangeHandler>>,
    watch: Mutex<Option<watcher::WatchGuard>>,
}

/// Shared, layered source of configuration truth
///
/// Cloning is cheap and every clone reads and mutates the same layers.
/// The store is constructed explicitly and passed to whoever needs it;
/// there is no process-wide instance.
#[derive(Clone)]
pub struct ConfigStore {
    shared: Arc<Shared>,
}

impl ConfigStore {
    /// Create an empty store considering environment variables under `env_prefix`
    pub fn new(env_prefix: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State {
                    env_prefix: env_prefix.into(),
                    defaults: Value::Mapping(Mapping::new()),
                    file: Value::Mapping(Mapping::new()),
                    source: None,
                }),
                handlers: Mutex::new(Vec::new()),
                watch: Mutex::new(None),
            }),
        }
    }

    /// Set a default value for a dotted key, the lowest precedence layer
    pub fn set_default(&self, key: &str, value: Value) {
        let mut state = self.shared.state.write();
        insert_path(&mut state.defaults, key, value);
    }

    /// Look up a value for a dotted key across all layers
    pub fn get(&self, key: &str) -> Option<Value> {
        let state = self.shared.state.read();
        if let Ok(raw) = env::var(env_key(&state.env_prefix, key)) {
            return Some(Value::String(raw));
        }
        lookup_path(&state.file, key)
            .or_else(|| lookup_path(&state.defaults, key))
            .cloned()
    }

    /// Look up a key and render it as a string; absent keys yield `""`
    pub fn get_string(&self, key: &str) -> String {
        match self.get(key) {
            Some(Value::String(text)) => text,
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::Bool(flag)) => flag.to_string(),
            _ => String::new(),
        }
    }

    /// Decode the subtree rooted at `key` into a typed struct
    ///
    /// Defaults and file values are deep-merged (file wins), then any
    /// `<PREFIX>_<KEY>_<FIELD>` environment variable overlays its field as
    /// a string scalar. Unknown keys are ignored by the target struct;
    /// missing keys leave fields at their default values.
    pub fn unmarshal_key<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        let merged = {
            let state = self.shared.state.read();
            let mut merged = lookup_path(&state.defaults, key)
                .cloned()
                .unwrap_or(Value::Mapping(Mapping::new()));
            if let Some(file_subtree) = lookup_path(&state.file, key) {
                merge(&mut merged, file_subtree);
            }
            overlay_env(&mut merged, &state.env_prefix, key);
            merged
        };
        serde_yaml::from_value(merged).map_err(|source| ConfigError::Unmarshal {
            key: key.to_string(),
            source,
        })
    }

    /// Resolve `config_path` and load the file into the file layer
    pub fn load(&self, config_path: &str) -> Result<(), ConfigError> {
        let path = loader::resolve(config_path)?;
        let tree = loader::load_file(&path)?;
        let mut state = self.shared.state.write();
        state.file = tree;
        state.source = Some(path);
        Ok(())
    }

    /// The concrete file backing the file layer, once loaded
    pub fn source(&self) -> Option<PathBuf> {
        self.shared.state.read().source.clone()
    }

    /// Start watching the loaded file for changes
    ///
    /// Watching runs for the rest of the process lifetime; there is no
    /// shutdown hook.
    pub fn watch(&self) -> Result<(), ConfigError> {
        let path = { self.shared.state.read().source.clone() };
        let Some(path) = path else {
            return Err(ConfigError::NotLoaded);
        };
        let guard = watcher::spawn(self.clone(), path)?;
        *self.shared.watch.lock() = Some(guard);
        Ok(())
    }

    /// Register a handler invoked after each successful re-read of the file
    ///
    /// Handlers run on the watcher's dispatcher thread, concurrently with
    /// normal application logic. No ordering is guaranteed between
    /// handlers.
    pub fn on_change<F>(&self, handler: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.handlers.lock().push(Box::new(handler));
    }

    /// Re-read the backing file and notify subscribers
    ///
    /// An unreadable or unparsable file leaves the previous file layer in
    /// place; the failure is logged and subscribers are not notified.
    pub(crate) fn reload(&self) {
        let source = { self.shared.state.read().source.clone() };
        let Some(path) = source else {
            return;
        };
        match loader::load_file(&path) {
            Ok(tree) => {
                {
                    self.shared.state.write().file = tree;
                }
                debug!(path = %path.display(), "configuration file reloaded");
                let event = ChangeEvent { path };
                let handlers = self.shared.handlers.lock();
                for handler in handlers.iter() {
                    handler(&event);
                }
            }
            Err(err) => {
                warn!("changed configuration file could not be read: {err}; keeping previous values");
            }
        }
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("ConfigStore")
            .field("env_prefix", &state.env_prefix)
            .field("source", &state.source)
            .finish_non_exhaustive()
    }
}

/// Environment variable name for a dotted key under a prefix
fn env_key(prefix: &str, key: &str) -> String {
    format!("{}_{}", prefix, key.replace('.', "_")).to_ascii_uppercase()
}

/// Descend a dotted path through nested mappings, case-insensitively
fn lookup_path<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = tree;
    for segment in key.split('.') {
        let map = current.as_mapping()?;
        let (_, child) = map
            .iter()
            .find(|(k, _)| k.as_str().is_some_and(|s| s.eq_ignore_ascii_case(segment)))?;
        current = child;
    }
    Some(current)
}

/// Insert a value at a dotted path, creating intermediate mappings
fn insert_path(tree: &mut Value, key: &str, value: Value) {
    if !tree.is_mapping() {
        *tree = Value::Mapping(Mapping::new());
    }
    let Some(map) = tree.as_mapping_mut() else {
        return;
    };
    match key.split_once('.') {
        None => replace_entry(map, key, value),
        Some((head, rest)) => {
            let head_key =
                existing_key_for(map, head).unwrap_or_else(|| Value::String(head.to_string()));
            if !matches!(map.get(&head_key), Some(Value::Mapping(_))) {
                map.insert(head_key.clone(), Value::Mapping(Mapping::new()));
            }
            if let Some(child) = map.get_mut(&head_key) {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Insert `name -> value`, removing keys that match `name` case-insensitively
fn replace_entry(map: &mut Mapping, name: &str, value: Value) {
    let stale: Vec<Value> = map
        .keys()
        .filter(|k| k.as_str().is_some_and(|s| s.eq_ignore_ascii_case(name)))
        .cloned()
        .collect();
    for key in stale {
        map.remove(&key);
    }
    map.insert(Value::String(name.to_string()), value);
}

fn existing_key_for(map: &Mapping, name: &str) -> Option<Value> {
    map.keys()
        .find(|k| k.as_str().is_some_and(|s| s.eq_ignore_ascii_case(name)))
        .cloned()
}

/// Deep-merge `overlay` onto `base`; non-mapping overlays replace wholesale
fn merge(base: &mut Value, overlay: &Value) {
    if let (Value::Mapping(base_map), Value::Mapping(overlay_map)) = (&mut *base, overlay) {
        for (key, value) in overlay_map {
            let existing = match key.as_str() {
                Some(name) => existing_key_for(base_map, name),
                None => base_map.keys().find(|k| *k == key).cloned(),
            };
            match existing {
                Some(existing) => {
                    if let Some(slot) = base_map.get_mut(&existing) {
                        merge(slot, value);
                    }
                }
                None => {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
        return;
    }
    *base = overlay.clone();
}

/// Overlay `<PREFIX>_<KEY>_<FIELD>` environment variables onto a subtree
///
/// Field names are lowercased; existing file keys are replaced
/// case-insensitively so `sourcePath` and `SOURCEPATH` never coexist.
fn overlay_env(target: &mut Value, env_prefix: &str, key: &str) {
    let section_prefix = format!("{}_", env_key(env_prefix, key));
    for (name, raw) in env::vars() {
        let Some(rest) = name.strip_prefix(&section_prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        if !target.is_mapping() {
            *target = Value::Mapping(Mapping::new());
        }
        if let Some(map) = target.as_mapping_mut() {
            replace_entry(map, &rest.to_ascii_lowercase(), Value::String(raw));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Debug, Default, Deserialize, PartialEq, Eq)]
    #[serde(default)]
    struct SampleSection {
        name: String,
        #[serde(rename = "sourcePath", alias = "sourcepath")]
        source_path: String,
    }

    fn store_with_file(prefix: &str, content: &str) -> (ConfigStore, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, content).expect("write config");
        let store = ConfigStore::new(prefix);
        store
            .load(path.to_str().expect("utf-8 path"))
            .expect("load config");
        (store, dir)
    }

    #[test]
    fn test_defaults_only() {
        let store = ConfigStore::new("RETPL_STORE_A");
        store.set_default("foo", Value::String("bar".into()));
        store.set_default("sample.name", Value::String("from-default".into()));

        assert_eq!(store.get_string("foo"), "bar");
        assert_eq!(store.get_string("sample.name"), "from-default");
        assert_eq!(store.get_string("absent"), "");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let (store, _dir) = store_with_file("RETPL_STORE_B", "sample:\n  name: from-file\n");
        store.set_default("sample.name", Value::String("from-default".into()));

        assert_eq!(store.get_string("sample.name"), "from-file");
    }

    #[test]
    fn test_env_overrides_file_even_after_load() {
        let (store, _dir) = store_with_file("RETPL_STORE_C", "sample:\n  name: from-file\n");
        assert_eq!(store.get_string("sample.name"), "from-file");

        // Exported after the file was loaded; must still win.
        env::set_var("RETPL_STORE_C_SAMPLE_NAME", "from-env");
        assert_eq!(store.get_string("sample.name"), "from-env");
        env::remove_var("RETPL_STORE_C_SAMPLE_NAME");
    }

    #[test]
    fn test_unmarshal_merges_defaults_under_file() {
        let (store, _dir) =
            store_with_file("RETPL_STORE_D", "sample:\n  sourcePath: /srv/templates\n");
        store.set_default("sample.name", Value::String("from-default".into()));

        let section: SampleSection = store.unmarshal_key("sample").expect("unmarshal");
        assert_eq!(
            section,
            SampleSection {
                name: "from-default".into(),
                source_path: "/srv/templates".into(),
            }
        );
    }

    #[test]
    fn test_unmarshal_env_overlay_replaces_file_key() {
        let (store, _dir) =
            store_with_file("RETPL_STORE_E", "sample:\n  sourcePath: /srv/templates\n");
        env::set_var("RETPL_STORE_E_SAMPLE_SOURCEPATH", "/srv/other");

        let section: SampleSection = store.unmarshal_key("sample").expect("unmarshal");
        assert_eq!(section.source_path, "/srv/other");
        env::remove_var("RETPL_STORE_E_SAMPLE_SOURCEPATH");
    }

    #[test]
    fn test_unmarshal_missing_key_yields_defaults() {
        let (store, _dir) = store_with_file("RETPL_STORE_F", "foo: bar\n");
        let section: SampleSection = store.unmarshal_key("sample").expect("unmarshal");
        assert_eq!(section, SampleSection::default());
    }

    #[test]
    fn test_unmarshal_ignores_unknown_keys() {
        let (store, _dir) = store_with_file(
            "RETPL_STORE_G",
            "sample:\n  name: ok\n  surplus: ignored\n",
        );
        let section: SampleSection = store.unmarshal_key("sample").expect("unmarshal");
        assert_eq!(section.name, "ok");
    }

    #[test]
    fn test_unmarshal_wrong_shape_errors() {
        let (store, _dir) = store_with_file("RETPL_STORE_H", "sample:\n  name: [1, 2]\n");
        let err = store.unmarshal_key::<SampleSection>("sample").unwrap_err();
        assert!(matches!(err, ConfigError::Unmarshal { .. }));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let (store, _dir) = store_with_file("RETPL_STORE_I", "Sample:\n  Name: mixed\n");
        assert_eq!(store.get_string("sample.name"), "mixed");
    }

    #[test]
    fn test_reload_swaps_file_layer_and_notifies() {
        let (store, dir) = store_with_file("RETPL_STORE_J", "sample:\n  name: first\n");
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        store.on_change(move |event| {
            assert!(event.path.ends_with("config.yaml"));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        fs::write(dir.path().join("config.yaml"), "sample:\n  name: second\n")
            .expect("rewrite config");
        store.reload();

        assert_eq!(store.get_string("sample.name"), "second");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reload_keeps_previous_tree_on_parse_failure() {
        let (store, dir) = store_with_file("RETPL_STORE_K", "sample:\n  name: first\n");
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        store.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        fs::write(dir.path().join("config.yaml"), "sample: [broken").expect("rewrite config");
        store.reload();

        assert_eq!(store.get_string("sample.name"), "first");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_watch_requires_loaded_file() {
        let store = ConfigStore::new("RETPL_STORE_L");
        assert!(matches!(store.watch(), Err(ConfigError::NotLoaded)));
    }
}
