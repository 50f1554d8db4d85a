use std::collections::HashMap;
use std::hash::Hash;

/// Sentinel key handed out for `None`. Not a map entry.
const NULL_KEY: &str = "null";

/// Bidirectional value↔key table giving arbitrary server objects a stable
/// string identity on the wire. Keys are freshly incremented integers,
/// stringified, and are never reused while the value stays mapped.
///
/// # Examples
///
/// ```
/// # use boardwalk::keymap::KeyMapper;
/// let mut mapper: KeyMapper<String> = KeyMapper::new();
/// let key = mapper.key(Some(&"upload-target".to_string()));
/// assert_eq!(mapper.get(&key), Some(&"upload-target".to_string()));
/// assert_eq!(mapper.key(None), "null");
/// ```
#[derive(Debug, Default)]
pub struct KeyMapper<V>
where
    V: Eq + Hash + Clone,
{
    next_key: u64,
    key_to_value: HashMap<String, V>,
    value_to_key: HashMap<V, String>,
}

impl<V> KeyMapper<V>
where
    V: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            next_key: 0,
            key_to_value: HashMap::new(),
            value_to_key: HashMap::new(),
        }
    }

    /// Return the key for `value`, assigning a fresh one on first request.
    /// `None` maps to the literal `"null"` sentinel.
    pub fn key(&mut self, value: Option<&V>) -> String {
        let Some(value) = value else {
            return NULL_KEY.to_string();
        };
        if let Some(existing) = self.value_to_key.get(value) {
            return existing.clone();
        }
        self.next_key += 1;
        let key = self.next_key.to_string();
        self.value_to_key.insert(value.clone(), key.clone());
        self.key_to_value.insert(key.clone(), value.clone());
        key
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.key_to_value.get(key)
    }

    pub fn contains(&self, value: &V) -> bool {
        self.value_to_key.contains_key(value)
    }

    pub fn remove(&mut self, value: &V) {
        if let Some(key) = self.value_to_key.remove(value) {
            self.key_to_value.remove(&key);
        }
    }

    pub fn remove_all(&mut self) {
        self.key_to_value.clear();
        self.value_to_key.clear();
    }

    pub fn len(&self) -> usize {
        self.key_to_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_value.is_empty()
    }
}
