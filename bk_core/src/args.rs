use serde::{Deserialize, Serialize};

/// A task's dynamic argument bundle: a positional list plus a keyword map,
/// carried as a tagged-value tree rather than typed parameters. Handlers
/// are responsible for parsing their own arguments out of this; the core
/// never inspects their shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgBundle {
    #[serde(default)]
    pub positional: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl ArgBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positional(mut self, values: impl IntoIterator<Item = serde_json::Value>) -> Self {
        self.positional = values.into_iter().collect();
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.kwargs.get(key)
    }

    pub fn positional_at(&self, index: usize) -> Option<&serde_json::Value> {
        self.positional.get(index)
    }

    /// Split into the two JSON values a storage row keeps separately
    /// (`args_positional`, `args_kwargs`), so a driver never has to know
    /// this type's shape.
    pub fn to_row_values(&self) -> (serde_json::Value, serde_json::Value) {
        (
            serde_json::Value::Array(self.positional.clone()),
            serde_json::Value::Object(self.kwargs.clone()),
        )
    }

    /// Inverse of `to_row_values`; tolerant of a row written by a driver
    /// that stored `null` for an empty side.
    pub fn from_row_values(positional: serde_json::Value, kwargs: serde_json::Value) -> Self {
        let positional = match positional {
            serde_json::Value::Array(v) => v,
            _ => Vec::new(),
        };
        let kwargs = match kwargs {
            serde_json::Value::Object(m) => m,
            _ => serde_json::Map::new(),
        };
        Self { positional, kwargs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_reads_back() {
        let bundle = ArgBundle::new()
            .with_positional([serde_json::json!("alice"), serde_json::json!(42)])
            .with_kwarg("dry_run", serde_json::json!(false));

        assert_eq!(bundle.positional_at(0).unwrap(), "alice");
        assert_eq!(bundle.get("dry_run").unwrap(), false);
        assert!(bundle.get("missing").is_none());
    }

    #[test]
    fn row_values_roundtrip() {
        let bundle = ArgBundle::new()
            .with_positional([serde_json::json!(1)])
            .with_kwarg("k", serde_json::json!("v"));
        let (positional, kwargs) = bundle.to_row_values();
        let restored = ArgBundle::from_row_values(positional, kwargs);
        assert_eq!(restored, bundle);
    }

    #[test]
    fn serializes_as_positional_and_kwargs_object() {
        let bundle = ArgBundle::new().with_kwarg("n", serde_json::json!(1));
        let value = serde_json::to_value(&bundle).unwrap();
        assert!(value.get("positional").is_some());
        assert!(value.get("kwargs").is_some());
    }
}
