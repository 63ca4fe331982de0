use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// A document's value for a conditioning variable (e.g. its publication year).
///
/// Loaders send keys as JSON strings or numbers; both are normalised to the
/// same textual form, so `2000` and `"2000"` name one category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CategoryKey(String);

impl CategoryKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CategoryKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CategoryKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for CategoryKey {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKey {
    Text(String),
    Number(serde_json::Number),
}

impl<'de> Deserialize<'de> for CategoryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawKey::deserialize(deserializer)? {
            RawKey::Text(s) => Self(s),
            RawKey::Number(n) => Self(n.to_string()),
        })
    }
}

/// Per-document category keys for one conditioning variable, indexed by
/// document position. `None` (JSON `null`) marks a document without a key;
/// so does any position past the end of the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentCategoryIndex {
    keys: Vec<Option<CategoryKey>>,
}

impl DocumentCategoryIndex {
    pub fn new(keys: Vec<Option<CategoryKey>>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key of `doc`, if it has one.
    pub fn key(&self, doc: usize) -> Option<&CategoryKey> {
        self.keys.get(doc).and_then(Option::as_ref)
    }
}

impl<K: Into<CategoryKey>> FromIterator<K> for DocumentCategoryIndex {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(|k| Some(k.into())).collect(),
        }
    }
}
