//! App-scope settings with sticky defaults and change notification.

use std::sync::{Arc, Mutex};

use relayhub_broker::EventHub;
use relayhub_core::prelude::*;
use relayhub_core::SettingChange;
use serde_json::{json, Map, Value};

use crate::storage::Storage;

/// Fixed storage key holding the settings blob
pub const SETTINGS_KEY: &str = "app-settings";

/// Key/value settings store.
///
/// The persisted map is loaded once per process lifetime. `set` persists
/// synchronously (errors propagate) and emits a `setting-change` event on
/// the `app` source. A `get` with a supplied default durably writes the
/// default back when the key is absent, so the next read sees it as
/// present.
pub struct SettingsStore {
    storage: Arc<dyn Storage>,
    hub: Arc<EventHub>,
    cache: Mutex<Option<Map<String, Value>>>,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn Storage>, hub: Arc<EventHub>) -> Self {
        Self {
            storage,
            hub,
            cache: Mutex::new(None),
        }
    }

    /// Seed values for a first run with no persisted settings
    fn default_settings() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("webServerEnabled".to_string(), json!(true));
        map.insert("webServerPort".to_string(), json!(1080));
        map.insert("gameConnectionEnabled".to_string(), json!(false));
        map
    }

    /// The `app` source hub this store emits change events on
    pub fn hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut cache = self.cache.lock().expect("settings cache poisoned");
        let map = self.loaded(&mut cache)?;
        Ok(map.get(key).cloned())
    }

    /// Sticky-default read: an absent key is written back with `default`
    /// before returning it.
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        let mut cache = self.cache.lock().expect("settings cache poisoned");
        let map = self.loaded(&mut cache)?;
        if let Some(value) = map.get(key) {
            return Ok(value.clone());
        }
        map.insert(key.to_string(), default.clone());
        self.storage.set(SETTINGS_KEY, &Value::Object(map.clone()))?;
        Ok(default)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self
            .get(key)?
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    /// Write one setting: mutate, persist synchronously, then notify.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        {
            let mut cache = self.cache.lock().expect("settings cache poisoned");
            let map = self.loaded(&mut cache)?;
            map.insert(key.to_string(), value.clone());
            self.storage.set(SETTINGS_KEY, &Value::Object(map.clone()))?;
        }
        let change = SettingChange {
            key: key.to_string(),
            value,
        };
        if let Ok(payload) = serde_json::to_value(&change) {
            self.hub.emit("setting-change", &payload);
        }
        Ok(())
    }

    fn loaded<'a>(
        &self,
        cache: &'a mut Option<Map<String, Value>>,
    ) -> Result<&'a mut Map<String, Value>> {
        if cache.is_none() {
            let map = match self.storage.get(SETTINGS_KEY)? {
                Some(Value::Object(map)) => map,
                Some(other) => {
                    warn!("Settings blob has unexpected shape: {other}");
                    Self::default_settings()
                }
                None => Self::default_settings(),
            };
            *cache = Some(map);
        }
        Ok(cache.as_mut().expect("cache just filled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonFileStorage;
    use relayhub_broker::EventSource;
    use tempfile::tempdir;

    fn store_in(dir: &std::path::Path) -> SettingsStore {
        let storage = Arc::new(JsonFileStorage::new(dir.join("storage.json")));
        SettingsStore::new(storage, Arc::new(EventHub::new()))
    }

    #[test]
    fn test_defaults_seeded_on_first_load() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());

        assert_eq!(store.get("webServerEnabled").unwrap(), Some(json!(true)));
        assert_eq!(store.get("webServerPort").unwrap(), Some(json!(1080)));
        assert!(!store.get_bool("gameConnectionEnabled").unwrap());
    }

    #[test]
    fn test_sticky_default() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());

        assert_eq!(store.get("x").unwrap(), None);
        assert_eq!(store.get_or("x", json!(7)).unwrap(), json!(7));
        // The default stuck: a plain read now sees it
        assert_eq!(store.get("x").unwrap(), Some(json!(7)));
    }

    #[test]
    fn test_sticky_default_persists_across_instances() {
        let temp = tempdir().unwrap();
        {
            let store = store_in(temp.path());
            store.get_or("x", json!(7)).unwrap();
        }
        let store = store_in(temp.path());
        assert_eq!(store.get("x").unwrap(), Some(json!(7)));
    }

    #[test]
    fn test_existing_value_wins_over_default() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());

        store.set("x", json!(3)).unwrap();
        assert_eq!(store.get_or("x", json!(7)).unwrap(), json!(3));
    }

    #[test]
    fn test_set_emits_change_event() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_ref = received.clone();
        store.hub().add_listener(
            "setting-change",
            1,
            Arc::new(move |payload| received_ref.lock().unwrap().push(payload.clone())),
        );

        store.set("webServerPort", json!(8080)).unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["key"], "webServerPort");
        assert_eq!(received[0]["value"], 8080);
    }

    #[test]
    fn test_sticky_default_does_not_emit() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        let received = Arc::new(Mutex::new(0usize));
        let received_ref = received.clone();
        store.hub().add_listener(
            "setting-change",
            1,
            Arc::new(move |_| *received_ref.lock().unwrap() += 1),
        );

        store.get_or("x", json!(1)).unwrap();

        assert_eq!(*received.lock().unwrap(), 0);
    }

    #[test]
    fn test_set_propagates_storage_error() {
        struct FailingStorage;
        impl Storage for FailingStorage {
            fn get(&self, _key: &str) -> Result<Option<Value>> {
                Ok(None)
            }
            fn set(&self, _key: &str, _value: &Value) -> Result<()> {
                Err(Error::storage("disk full"))
            }
            fn delete(&self, _key: &str) -> Result<()> {
                Ok(())
            }
        }

        let store = SettingsStore::new(Arc::new(FailingStorage), Arc::new(EventHub::new()));
        let err = store.set("x", json!(1)).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[test]
    fn test_set_round_trips_through_storage_blob() {
        let temp = tempdir().unwrap();
        let storage = Arc::new(JsonFileStorage::new(temp.path().join("storage.json")));
        let store = SettingsStore::new(storage.clone(), Arc::new(EventHub::new()));

        store.set("theme", json!("dark")).unwrap();

        let blob = storage.get(SETTINGS_KEY).unwrap().unwrap();
        assert_eq!(blob["theme"], "dark");
    }
}
