//! Path addressing for documents and collections.
//!
//! An [`Address`] is an ordered list of non-empty components. Components
//! alternate collection / document, so a document address has an even number
//! of components and a collection address an odd number.

use crate::error::{ClientError, Result};
use std::fmt;

/// Immutable path identity of a document or collection.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    components: Vec<String>,
}

impl Address {
    /// Parse a slash-delimited path. One leading and one trailing slash are
    /// accepted; empty interior components are not.
    pub fn parse(path: &str) -> Result<Self> {
        let components = split_components(path)?;
        if components.is_empty() {
            return Err(ClientError::InvalidPath("path is empty".into()));
        }
        Ok(Self { components })
    }

    /// Build from already-split components.
    pub fn from_components<I, S>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        if components.is_empty() {
            return Err(ClientError::InvalidPath("path is empty".into()));
        }
        for component in &components {
            validate_component(component)?;
        }
        Ok(Self { components })
    }

    /// New address with one component appended.
    pub fn join(&self, component: &str) -> Result<Self> {
        validate_component(component)?;
        let mut components = self.components.clone();
        components.push(component.to_string());
        Ok(Self { components })
    }

    /// New address with every component of a relative path appended.
    pub fn child(&self, path: &str) -> Result<Self> {
        let extra = split_components(path)?;
        if extra.is_empty() {
            return Err(ClientError::InvalidPath("child path is empty".into()));
        }
        let mut components = self.components.clone();
        components.extend(extra);
        Ok(Self { components })
    }

    /// New address without the last component, or `None` for a top-level
    /// collection.
    pub fn parent(&self) -> Option<Self> {
        if self.components.len() < 2 {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// Slash-joined path, without a leading slash.
    pub fn path(&self) -> String {
        self.components.join("/")
    }

    /// The final component: the document or collection ID.
    pub fn last_component(&self) -> &str {
        // parse/from_components never build an empty address
        self.components.last().map(String::as_str).unwrap_or_default()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn is_document(&self) -> bool {
        self.components.len() % 2 == 0
    }

    pub fn is_collection(&self) -> bool {
        !self.is_document()
    }
}

fn split_components(path: &str) -> Result<Vec<String>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('/')
        .map(|component| {
            if component.is_empty() {
                Err(ClientError::InvalidPath(format!(
                    "empty component in \"{}\"",
                    path
                )))
            } else {
                Ok(component.to_string())
            }
        })
        .collect()
}

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(ClientError::InvalidPath("empty path component".into()));
    }
    if component.contains('/') {
        return Err(ClientError::InvalidPath(format!(
            "component \"{}\" contains '/'",
            component
        )));
    }
    Ok(())
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.path())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_parity() {
        let doc = Address::parse("/users/42").unwrap();
        assert_eq!(doc.path(), "users/42");
        assert_eq!(doc.last_component(), "42");
        assert!(doc.is_document());

        let col = Address::parse("users/42/posts/").unwrap();
        assert!(col.is_collection());
        assert_eq!(col.len(), 3);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(Address::parse(""), Err(ClientError::InvalidPath(_))));
        assert!(matches!(Address::parse("/"), Err(ClientError::InvalidPath(_))));
        assert!(matches!(
            Address::parse("users//42"),
            Err(ClientError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_join_validates_component() {
        let users = Address::parse("users").unwrap();
        assert_eq!(users.join("42").unwrap().path(), "users/42");
        assert!(users.join("").is_err());
        assert!(users.join("a/b").is_err());
    }

    #[test]
    fn test_parent_navigation() {
        let doc = Address::parse("users/42/posts/7").unwrap();
        let posts = doc.parent().unwrap();
        assert_eq!(posts.path(), "users/42/posts");
        assert!(posts.is_collection());
        assert_eq!(posts.parent().unwrap().path(), "users/42");

        let top = Address::parse("users").unwrap();
        assert!(top.parent().is_none());
    }

    #[test]
    fn test_child_multi_segment() {
        let doc = Address::parse("users/42").unwrap();
        let nested = doc.child("posts/7/comments").unwrap();
        assert_eq!(nested.path(), "users/42/posts/7/comments");
        assert!(doc.child("").is_err());
        assert!(doc.child("a//b").is_err());
    }

    #[test]
    fn test_equality_independent_of_construction() {
        let parsed = Address::parse("users/42").unwrap();
        let joined = Address::parse("users").unwrap().join("42").unwrap();
        let built = Address::from_components(["users", "42"]).unwrap();
        assert_eq!(parsed, joined);
        assert_eq!(joined, built);
    }
}
