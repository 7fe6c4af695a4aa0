//! Named tag lookup.

use std::collections::HashMap;

use crate::device::TagDefinition;
use crate::error::{GatewayError, GatewayResult};

/// Tag definitions keyed by logical name. Owned by the executor; there is no
/// process-wide table.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: HashMap<String, TagDefinition>,
}

impl TagRegistry {
    /// Later definitions with the same name replace earlier ones.
    pub fn new(definitions: impl IntoIterator<Item = TagDefinition>) -> Self {
        Self {
            tags: definitions
                .into_iter()
                .map(|tag| (tag.name.clone(), tag))
                .collect(),
        }
    }

    pub fn resolve(&self, name: &str) -> GatewayResult<&TagDefinition> {
        self.tags
            .get(name)
            .ok_or_else(|| GatewayError::UnknownTag(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tag names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tags.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn definitions(&self) -> impl Iterator<Item = &TagDefinition> {
        self.tags.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DataType;

    #[test]
    fn test_resolve_and_unknown() {
        let registry = TagRegistry::new([
            TagDefinition {
                name: "speed".into(),
                address: "DB1.DBW0".into(),
                data_type: DataType::Int,
            },
            TagDefinition {
                name: "running".into(),
                address: "DB1.DBX2.0".into(),
                data_type: DataType::Bool,
            },
        ]);

        assert_eq!(registry.resolve("speed").unwrap().address, "DB1.DBW0");
        assert_eq!(
            registry.resolve("pressure"),
            Err(GatewayError::UnknownTag("pressure".into()))
        );
        assert_eq!(registry.names(), vec!["running", "speed"]);
    }
}
