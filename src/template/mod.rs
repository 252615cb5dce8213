//! Payload templates with literal `<TOKEN>` placeholders.
//!
//! Substitution is a naive whole-string replace applied in binding order:
//! every occurrence of a bound token is replaced, wherever it appears,
//! including occurrences introduced by an earlier substitution. Templates
//! and values must therefore avoid accidental collisions with token names.

use crate::core::{CommitError, Result, TemplateError};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref PLACEHOLDER_PATTERN: Regex = Regex::new(r"<([A-Z][A-Z0-9_]*)>").unwrap();
    static ref PLACEHOLDER_NAME: Regex = Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap();
}

/// Placeholder bound by the commit chain to the id returned from the spawn step.
pub const ENTITY_ID_PLACEHOLDER: &str = "ENTITY_ID";

/// Formats a placeholder name as its literal token, e.g. `NAME` -> `<NAME>`.
pub fn token(name: &str) -> String {
    format!("<{}>", name)
}

/// Ordered placeholder bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    entries: Vec<(String, String)>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Placeholders::insert`].
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Binds `name`, keeping the original position when it was already bound.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(bound, _)| *bound == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTemplate {
    source: Arc<str>,
}

impl PayloadTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: Arc::from(source.into()),
        }
    }

    /// Reads a template from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await.map_err(|err| {
            CommitError::IoError(format!(
                "Failed to read payload template '{}': {}",
                path.display(),
                err
            ))
        })?;
        Ok(Self::new(source))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names that occur in the template source.
    pub fn declared(&self) -> BTreeSet<String> {
        PLACEHOLDER_PATTERN
            .captures_iter(&self.source)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Substitutes every bound placeholder.
    ///
    /// Fails when a binding has an invalid name or when the template declares
    /// a placeholder that has no binding.
    pub fn render(&self, values: &Placeholders) -> std::result::Result<String, TemplateError> {
        if let Some((name, _)) = values.iter().find(|(name, _)| !PLACEHOLDER_NAME.is_match(name)) {
            return Err(TemplateError::InvalidPlaceholder(name.to_string()));
        }

        let unbound: Vec<String> = self
            .declared()
            .into_iter()
            .filter(|name| values.get(name).is_none())
            .map(|name| token(&name))
            .collect();
        if !unbound.is_empty() {
            return Err(TemplateError::Unbound(unbound));
        }

        let rendered = values
            .iter()
            .fold(self.source.to_string(), |acc, (name, value)| {
                acc.replace(&token(name), value)
            });
        Ok(rendered)
    }
}

impl From<&str> for PayloadTemplate {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_every_occurrence() {
        let template = PayloadTemplate::new("Name = '<NAME>'\nTicker = '<TICKER>'\n-- <NAME>");
        let values = Placeholders::new().set("NAME", "Scan").set("TICKER", "ATOMIC");

        let rendered = template.render(&values).unwrap();
        assert_eq!(rendered, "Name = 'Scan'\nTicker = 'ATOMIC'\n-- Scan");
        assert!(PLACEHOLDER_PATTERN.find(&rendered).is_none());
    }

    #[test]
    fn render_leaves_unrelated_text_alone() {
        let template = PayloadTemplate::new("if a <b then x = '<lower>' end <NAME>");
        let values = Placeholders::new().set("NAME", "n");

        assert_eq!(
            template.render(&values).unwrap(),
            "if a <b then x = '<lower>' end n"
        );
    }

    #[test]
    fn render_rejects_unbound_placeholders() {
        let template = PayloadTemplate::new("<NAME> <OWNER> <BALANCE>");
        let err = template
            .render(&Placeholders::new().set("NAME", "x"))
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unbound(vec!["<BALANCE>".to_string(), "<OWNER>".to_string()])
        );
    }

    #[test]
    fn render_rejects_invalid_names() {
        let template = PayloadTemplate::new("<NAME>");
        let values = Placeholders::new().set("NAME", "x").set("lower", "y");
        assert_eq!(
            template.render(&values).unwrap_err(),
            TemplateError::InvalidPlaceholder("lower".to_string())
        );
    }

    #[test]
    fn token_shaped_values_are_substituted_by_later_bindings() {
        // Naive replace: a value that contains a later token is rewritten too.
        let template = PayloadTemplate::new("<NAME>|<OWNER>");
        let values = Placeholders::new().set("NAME", "<OWNER>").set("OWNER", "me");
        assert_eq!(template.render(&values).unwrap(), "me|me");
    }

    #[test]
    fn insert_overrides_in_place() {
        let mut values = Placeholders::new().set("A", "1").set("B", "2");
        values.insert("A", "3");
        let pairs: Vec<_> = values.iter().collect();
        assert_eq!(pairs, vec![("A", "3"), ("B", "2")]);
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn declared_lists_distinct_names() {
        let template = PayloadTemplate::new("<A><B><A>");
        let declared: Vec<_> = template.declared().into_iter().collect();
        assert_eq!(declared, vec!["A".to_string(), "B".to_string()]);
    }
}
