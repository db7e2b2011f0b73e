//! Field catalog discovered from the store's index mapping

use crate::client::StoreClient;
use crate::error::{CollectError, CollectResult};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Date,
    Keyword,
    Text,
    Boolean,
    Other,
}

impl FieldKind {
    pub fn classify(store_type: &str) -> Self {
        match store_type {
            "long" | "integer" | "short" | "byte" | "double" | "float" | "half_float"
            | "scaled_float" | "unsigned_long" => FieldKind::Numeric,
            "date" | "date_nanos" => FieldKind::Date,
            "keyword" | "constant_keyword" | "wildcard" | "ip" => FieldKind::Keyword,
            "text" | "match_only_text" => FieldKind::Text,
            "boolean" => FieldKind::Boolean,
            _ => FieldKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    /// Type name as reported by the store (`float`, `keyword`, ...)
    pub name: String,
    pub kind: FieldKind,
}

impl FieldType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::classify(name),
        }
    }
}

/// Flattened `field path -> type` mapping for one index (or index pattern)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldCatalog {
    pub index: String,
    fields: BTreeMap<String, FieldType>,
}

impl FieldCatalog {
    /// Fetch the mapping of `index` and flatten it
    pub async fn discover<C>(client: &C, index: &str) -> CollectResult<Self>
    where
        C: StoreClient + ?Sized,
    {
        let mapping = client.field_mapping(index).await?;
        let catalog = Self::from_mapping(index, &mapping)?;
        log::debug!("Discovered {} fields on index '{}'", catalog.len(), index);
        Ok(catalog)
    }

    /// Build from a raw `GET /<index>/_mapping` response
    ///
    /// Mappings of every concrete index matched by a pattern are merged.
    pub fn from_mapping(index: &str, mapping: &Value) -> CollectResult<Self> {
        let indices = mapping.as_object().ok_or_else(|| {
            CollectError::ResponseShape(format!("mapping for '{}' is not an object", index))
        })?;

        if indices.is_empty() {
            return Err(CollectError::NotFound(format!("no mapping for index '{}'", index)));
        }

        let mut catalog = FieldCatalog {
            index: index.to_string(),
            fields: BTreeMap::new(),
        };

        for index_mapping in indices.values() {
            let mappings = match index_mapping.get("mappings") {
                Some(m) => m,
                None => continue,
            };

            if let Some(properties) = mappings.get("properties") {
                catalog.collect_properties("", properties);
            } else if let Some(types) = mappings.as_object() {
                // Pre-7.x mappings are keyed by document type
                for type_mapping in types.values() {
                    if let Some(properties) = type_mapping.get("properties") {
                        catalog.collect_properties("", properties);
                    }
                }
            }
        }

        Ok(catalog)
    }

    fn collect_properties(&mut self, prefix: &str, properties: &Value) {
        let Some(properties) = properties.as_object() else {
            return;
        };

        for (name, definition) in properties {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };

            if let Some(store_type) = definition.get("type").and_then(Value::as_str) {
                if store_type != "object" && store_type != "nested" {
                    self.fields.insert(path.clone(), FieldType::new(store_type));
                }
            }

            if let Some(children) = definition.get("properties") {
                self.collect_properties(&path, children);
            }

            // Multi-fields, e.g. `message.keyword`
            if let Some(multi) = definition.get("fields").and_then(Value::as_object) {
                for (sub, sub_def) in multi {
                    if let Some(sub_type) = sub_def.get("type").and_then(Value::as_str) {
                        self.fields
                            .insert(format!("{}.{}", path, sub), FieldType::new(sub_type));
                    }
                }
            }
        }
    }

    pub fn insert(&mut self, field: &str, store_type: &str) {
        self.fields.insert(field.to_string(), FieldType::new(store_type));
    }

    pub fn get(&self, field: &str) -> Option<&FieldType> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check every configured metric field exists, returning their types
    pub fn validate_fields(&self, fields: &[String]) -> CollectResult<BTreeMap<String, FieldType>> {
        let mut validated = BTreeMap::new();
        for field in fields {
            let field_type = self.get(field).ok_or_else(|| {
                CollectError::Configuration(format!(
                    "metric field '{}' not found on index '{}'",
                    field, self.index
                ))
            })?;
            validated.insert(field.clone(), field_type.clone());
        }
        Ok(validated)
    }
}
