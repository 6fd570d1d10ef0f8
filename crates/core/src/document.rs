//! Index documents and terms
//!
//! A [`Document`] is the unit stored in the index: an ordered list of fields,
//! each either tokenized text, an untokenized keyword, or a stored-only value.
//! Two reserved keyword fields identify the logical resource a document came
//! from: [`ALIAS_FIELD`] and [`UID_FIELD`].

use serde::{Deserialize, Serialize};

/// Reserved field holding the resource alias.
pub const ALIAS_FIELD: &str = "$/alias";

/// Reserved field holding the resource UID.
pub const UID_FIELD: &str = "$/uid";

/// How a field is analyzed when indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Tokenized full text.
    Text,
    /// Indexed as a single untokenized term.
    Keyword,
    /// Stored only, never indexed.
    Stored,
}

/// One field of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Raw value.
    pub value: String,
    /// Analysis mode.
    pub kind: FieldKind,
}

impl Field {
    /// Create a field.
    pub fn new(name: impl Into<String>, value: impl Into<String>, kind: FieldKind) -> Self {
        Field {
            name: name.into(),
            value: value.into(),
            kind,
        }
    }
}

/// A document as stored in the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<Field>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    /// Append a field.
    pub fn add(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Builder-style append.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>, kind: FieldKind) -> Self {
        self.add(Field::new(name, value, kind));
        self
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// First value of the named field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Resource alias, if the document carries one.
    pub fn alias(&self) -> Option<&str> {
        self.get(ALIAS_FIELD)
    }

    /// Resource UID, if the document carries one.
    pub fn uid(&self) -> Option<&str> {
        self.get(UID_FIELD)
    }
}

/// An indexed term: a field name and one analyzed token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term {
    /// Field name.
    pub field: String,
    /// Token text.
    pub text: String,
}

impl Term {
    /// Create a term.
    pub fn new(field: impl Into<String>, text: impl Into<String>) -> Self {
        Term {
            field: field.into(),
            text: text.into(),
        }
    }

    /// Term matching a resource UID.
    pub fn uid(uid: impl Into<String>) -> Self {
        Term::new(UID_FIELD, uid)
    }

    /// Term matching a resource alias.
    pub fn alias(alias: impl Into<String>) -> Self {
        Term::new(ALIAS_FIELD, alias)
    }
}
