use serde_json::{Map, Value};

use crate::{
    error::InvalidPathError,
    path::{self, AsPath, Path},
};

/// A set of paths read together into one flat object.
///
/// Each entry is stored under an alias. `"total:cart.total"` reads `cart.total` into
/// `total`; an entry without an alias uses its path as the key.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    fields: Vec<(String, Path)>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<'a>(entries: impl IntoIterator<Item = &'a str>) -> Result<Self, InvalidPathError> {
        let mut this = Self::new();
        for entry in entries {
            this = match entry.split_once(':') {
                Some((alias, path)) => this.field(alias, path)?,
                None => this.path(entry)?,
            };
        }
        Ok(this)
    }

    pub fn path(self, path: impl AsPath) -> Result<Self, InvalidPathError> {
        let path = path.to_path()?;
        let alias = path.as_str().to_string();
        Ok(self.push(alias, path))
    }

    pub fn field(
        self,
        alias: impl Into<String>,
        path: impl AsPath,
    ) -> Result<Self, InvalidPathError> {
        let path = path.to_path()?;
        Ok(self.push(alias.into(), path))
    }

    fn push(mut self, alias: String, path: Path) -> Self {
        self.fields.retain(|(a, _)| *a != alias);
        self.fields.push((alias, path));
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reads every entry from `state`. Missing or unreachable paths read as `null`.
    pub fn read(&self, state: &Value) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(alias, path)| {
                let value = path::get(state, path).ok().flatten().cloned();
                (alias.clone(), value.unwrap_or(Value::Null))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn read_flattens_with_aliases() {
        let state = json!({"user": {"name": "ann"}, "cart": {"total": 20}});
        let selection = Selection::parse(["user.name", "total:cart.total", "missing:a.b"]).unwrap();
        assert_eq!(
            Value::Object(selection.read(&state)),
            json!({"user.name": "ann", "total": 20, "missing": null})
        );
    }

    #[test]
    fn later_alias_wins() {
        let selection = Selection::new()
            .field("x", "a")
            .unwrap()
            .field("x", "b")
            .unwrap();
        assert_eq!(selection.len(), 1);
        assert_eq!(Value::Object(selection.read(&json!({"a": 1, "b": 2}))), json!({"x": 2}));
    }

    #[test]
    fn invalid_path_is_rejected() {
        assert!(Selection::parse(["x:constructor.name"]).is_err());
        assert!(Selection::parse(["a..b"]).is_err());
    }
}
