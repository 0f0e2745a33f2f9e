//! Gems: reusable system prompts, either predefined by the service or user-created.

use crate::utils::NestedPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    pub predefined: bool,
}

impl Gem {
    /// Parse one gem entry of a list-gems response: `[id, [name, description], [prompt], ...]`.
    pub fn from_wire(entry: &Value, predefined: bool) -> Option<Self> {
        let id = NestedPath::get_non_empty_str(entry, &[0])?;
        let name = NestedPath::get_str(entry, &[1, 0])?;
        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            description: NestedPath::get_str(entry, &[1, 1]).map(str::to_string),
            prompt: NestedPath::get_non_empty_str(entry, &[2, 0]).map(str::to_string),
            predefined,
        })
    }
}

/// Anything that identifies a gem in a generate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GemRef {
    Id(String),
    Gem(Gem),
}

impl GemRef {
    pub fn id(&self) -> &str {
        match self {
            GemRef::Id(id) => id,
            GemRef::Gem(gem) => &gem.id,
        }
    }
}

impl From<&str> for GemRef {
    fn from(id: &str) -> Self {
        GemRef::Id(id.to_string())
    }
}

impl From<String> for GemRef {
    fn from(id: String) -> Self {
        GemRef::Id(id)
    }
}

impl From<Gem> for GemRef {
    fn from(gem: Gem) -> Self {
        GemRef::Gem(gem)
    }
}

impl From<&Gem> for GemRef {
    fn from(gem: &Gem) -> Self {
        GemRef::Gem(gem.clone())
    }
}

/// Collection of gems keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GemJar {
    gems: BTreeMap<String, Gem>,
}

impl GemJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, gem: Gem) {
        self.gems.insert(gem.id.clone(), gem);
    }

    pub fn remove(&mut self, id: &str) -> Option<Gem> {
        self.gems.remove(id)
    }

    pub fn len(&self) -> usize {
        self.gems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gem> {
        self.gems.values()
    }

    /// Look up a gem by id and/or name. With both given, both must match.
    /// Returns `None` when neither is given.
    pub fn get(&self, id: Option<&str>, name: Option<&str>) -> Option<&Gem> {
        match (id, name) {
            (Some(id), name) => self
                .gems
                .get(id)
                .filter(|g| name.map_or(true, |n| g.name == n)),
            (None, Some(name)) => self.gems.values().find(|g| g.name == name),
            (None, None) => None,
        }
    }

    pub fn filter(&self, predefined: Option<bool>, name: Option<&str>) -> GemJar {
        self.gems
            .values()
            .filter(|g| predefined.map_or(true, |p| g.predefined == p))
            .filter(|g| name.map_or(true, |n| g.name == n))
            .cloned()
            .collect()
    }
}

impl FromIterator<Gem> for GemJar {
    fn from_iter<I: IntoIterator<Item = Gem>>(iter: I) -> Self {
        let mut jar = GemJar::new();
        for gem in iter {
            jar.insert(gem);
        }
        jar
    }
}
