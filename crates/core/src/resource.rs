//! Resource identity and content
//!
//! A [`ResourceKey`] names exactly one logical document: an alias plus an
//! ordered list of id properties. The key derives two things:
//!
//! - **UID**: `alias#name=value#...`, the term used to look the document up.
//!   `#`, `=` and `\` inside names and values are escaped with `\`, so the UID
//!   is injective over (alias, ids).
//! - **Partition**: the sub-index the document lives in, computed by a
//!   [`PartitionScheme`] from the alias and the UID. Since the partition is a
//!   function of the UID, equal UIDs always land on the same partition.

use crate::document::{Document, FieldKind, ALIAS_FIELD, UID_FIELD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use xxhash_rust::xxh3::xxh3_64;

/// A named value on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: String,
}

impl Property {
    /// Create a property.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Property {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// How resources are assigned to partitions (sub-indexes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum PartitionScheme {
    /// One partition per alias, named after the alias.
    Alias,
    /// `size` partitions named `{prefix}_{n}`, chosen by hashing the UID.
    Modulo {
        /// Partition name prefix.
        prefix: String,
        /// Number of partitions.
        size: u32,
    },
}

impl Default for PartitionScheme {
    fn default() -> Self {
        PartitionScheme::Alias
    }
}

impl PartitionScheme {
    /// Partition for a resource with the given alias and UID.
    pub fn partition(&self, alias: &str, uid: &str) -> String {
        match self {
            PartitionScheme::Alias => alias.to_string(),
            PartitionScheme::Modulo { prefix, size } => {
                let slot = xxh3_64(uid.as_bytes()) % u64::from((*size).max(1));
                format!("{}_{}", prefix, slot)
            }
        }
    }

    /// Every partition this scheme can produce for the given aliases.
    ///
    /// Used to scope searches; the modulo scheme spreads every alias across
    /// all of its partitions.
    pub fn partitions_for<'a>(&self, aliases: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        match self {
            PartitionScheme::Alias => {
                let mut out: Vec<String> = aliases.into_iter().map(str::to_string).collect();
                out.sort();
                out.dedup();
                out
            }
            PartitionScheme::Modulo { prefix, size } => (0..(*size).max(1))
                .map(|n| format!("{}_{}", prefix, n))
                .collect(),
        }
    }
}

/// Identity of one logical document.
///
/// Equality and hashing cover the alias and the id properties only; the
/// partition is derived.
#[derive(Clone)]
pub struct ResourceKey {
    alias: String,
    ids: Vec<Property>,
    uid: String,
    partition: String,
}

impl ResourceKey {
    /// Create a key, deriving its UID and partition.
    pub fn new(alias: impl Into<String>, ids: Vec<Property>, scheme: &PartitionScheme) -> Self {
        let alias = alias.into();
        let uid = build_uid(&alias, &ids);
        let partition = scheme.partition(&alias, &uid);
        ResourceKey {
            alias,
            ids,
            uid,
            partition,
        }
    }

    /// Convenience constructor for a single `id` property.
    pub fn single(alias: impl Into<String>, id: impl Into<String>, scheme: &PartitionScheme) -> Self {
        Self::new(alias, vec![Property::new("id", id)], scheme)
    }

    /// Resource alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Ordered id properties.
    pub fn ids(&self) -> &[Property] {
        &self.ids
    }

    /// Serialized unique identifier.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Partition (sub-index) name.
    pub fn partition(&self) -> &str {
        &self.partition
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias && self.ids == other.ids
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.alias.hash(state);
        self.ids.hash(state);
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceKey")
            .field("uid", &self.uid)
            .field("partition", &self.partition)
            .finish()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uid)
    }
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '#' | '=' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

fn build_uid(alias: &str, ids: &[Property]) -> String {
    let mut uid = String::with_capacity(alias.len() + ids.len() * 16);
    escape_into(&mut uid, alias);
    for id in ids {
        uid.push('#');
        escape_into(&mut uid, &id.name);
        uid.push('=');
        escape_into(&mut uid, &id.value);
    }
    uid
}

/// A resource: a key plus its content properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    key: ResourceKey,
    properties: Vec<(Property, FieldKind)>,
}

impl Resource {
    /// Create a resource with no content properties.
    pub fn new(key: ResourceKey) -> Self {
        Resource {
            key,
            properties: Vec::new(),
        }
    }

    /// Builder-style tokenized text property.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .push((Property::new(name, value), FieldKind::Text));
        self
    }

    /// Builder-style keyword property.
    pub fn keyword(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .push((Property::new(name, value), FieldKind::Keyword));
        self
    }

    /// Builder-style stored-only property.
    pub fn stored(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .push((Property::new(name, value), FieldKind::Stored));
        self
    }

    /// The resource key.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// First value of a content or id property.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .map(|(p, _)| p)
            .chain(self.key.ids.iter())
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Content properties with their analysis mode.
    pub fn properties(&self) -> impl Iterator<Item = (&Property, FieldKind)> {
        self.properties.iter().map(|(p, k)| (p, *k))
    }

    /// Convert to an index document.
    ///
    /// Id properties are written as keywords prefixed with `$/id/` so they can
    /// be restored in order by [`Resource::from_document`].
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new()
            .with(ALIAS_FIELD, self.key.alias.clone(), FieldKind::Keyword)
            .with(UID_FIELD, self.key.uid.clone(), FieldKind::Keyword);
        for id in &self.key.ids {
            doc = doc.with(format!("{}{}", ID_PREFIX, id.name), id.value.clone(), FieldKind::Keyword);
        }
        for (p, kind) in &self.properties {
            doc = doc.with(p.name.clone(), p.value.clone(), *kind);
        }
        doc
    }

    /// Rebuild a resource from an index document.
    ///
    /// Returns `None` for documents that were not written by
    /// [`Resource::to_document`].
    pub fn from_document(doc: &Document, scheme: &PartitionScheme) -> Option<Resource> {
        let alias = doc.alias()?;
        let mut ids = Vec::new();
        let mut properties = Vec::new();
        for field in doc.fields() {
            if field.name == ALIAS_FIELD || field.name == UID_FIELD {
                continue;
            }
            match field.name.strip_prefix(ID_PREFIX) {
                Some(name) => ids.push(Property::new(name, field.value.clone())),
                None => properties.push((
                    Property::new(field.name.clone(), field.value.clone()),
                    field.kind,
                )),
            }
        }
        Some(Resource {
            key: ResourceKey::new(alias, ids, scheme),
            properties,
        })
    }
}

const ID_PREFIX: &str = "$/id/";
