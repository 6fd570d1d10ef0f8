//! Search query types
//!
//! Queries are deliberately small: term and keyword matching plus boolean
//! composition. Scoring and full-text query parsing are out of scope; every
//! matching document is a hit.

use crate::document::Term;
use serde::{Deserialize, Serialize};

/// A search query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    /// Every live document.
    All,
    /// Documents containing the exact term.
    Term(Term),
    /// Documents whose field contains every token of `text`.
    ///
    /// The text is tokenized with the same analyzer used at index time.
    Text {
        /// Field to match.
        field: String,
        /// Free text.
        text: String,
    },
    /// Documents whose alias is one of the given aliases.
    Aliases(Vec<String>),
    /// Conjunction of `must` minus any document matching `must_not`.
    ///
    /// An empty `must` list means "all live documents".
    Bool {
        /// Required clauses.
        must: Vec<Query>,
        /// Excluded clauses.
        must_not: Vec<Query>,
    },
}

impl Query {
    /// Exact term query.
    pub fn term(field: impl Into<String>, text: impl Into<String>) -> Self {
        Query::Term(Term::new(field, text))
    }

    /// Tokenized text query.
    pub fn text(field: impl Into<String>, text: impl Into<String>) -> Self {
        Query::Text {
            field: field.into(),
            text: text.into(),
        }
    }

    /// Single-alias query.
    pub fn alias(alias: impl Into<String>) -> Self {
        Query::Aliases(vec![alias.into()])
    }

    /// Restrict this query to the given aliases.
    ///
    /// An empty alias list leaves the query unchanged.
    pub fn restrict_to(self, aliases: &[String]) -> Self {
        if aliases.is_empty() {
            return self;
        }
        Query::Bool {
            must: vec![self, Query::Aliases(aliases.to_vec())],
            must_not: Vec::new(),
        }
    }
}
