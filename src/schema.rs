//! In-memory schema model: `FieldType`, `Field`, `View`, `Layer`, `Config`,
//! compiled from the YAML-serialized configuration document.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::dsl;

/// A field's type, each variant mapping to one PostGIS/Postgres column type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Text,
    String { max_len: Option<usize> },
    Char { max_len: usize },
    Int,
    BigInt,
    Bool,
    Double,
    Json,
    Array { of: Box<FieldType> },
    Geom,
    Timestamp,
}

impl FieldType {
    /// Whether this field type participates in tile-affect computation.
    pub fn is_geom(&self) -> bool {
        matches!(self, FieldType::Geom)
    }

    /// The Postgres column type this field compiles to.
    pub fn pg_type(&self) -> String {
        match self {
            FieldType::Text => "varchar".to_string(),
            FieldType::String { max_len: None } => "varchar".to_string(),
            FieldType::String { max_len: Some(n) } => format!("varchar({n})"),
            FieldType::Char { max_len } => format!("char({max_len})"),
            FieldType::Int => "integer".to_string(),
            FieldType::BigInt => "bigint".to_string(),
            FieldType::Bool => "boolean".to_string(),
            FieldType::Double => "double precision".to_string(),
            FieldType::Json => "jsonb".to_string(),
            FieldType::Array { of } => format!("{}[]", of.pg_type()),
            FieldType::Geom => "geometry(Geometry, 3857)".to_string(),
            FieldType::Timestamp => "timestamp with time zone".to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("dsl error in field {field:?}: {source}")]
    Dsl { field: String, source: dsl::DslError },
    #[error("layer {layer:?} is missing id_field {id_field:?}")]
    MissingIdField { layer: String, id_field: String },
    #[error("layer {layer:?} has no geom field")]
    NoGeomField { layer: String },
    #[error("layer {layer:?} view {view:?} references unknown on_field {on_field:?}")]
    UnknownOnField {
        layer: String,
        view: String,
        on_field: String,
    },
    #[error("layer {layer:?} view {view:?} on_field {on_field:?} is not a geom field")]
    OnFieldNotGeom {
        layer: String,
        view: String,
        on_field: String,
    },
    #[error("layer {layer:?} view {view:?} references unknown field {field:?}")]
    UnknownViewField {
        layer: String,
        view: String,
        field: String,
    },
    #[error("duplicate layer name {0:?}")]
    DuplicateLayer(String),
    #[error("duplicate view name {view:?} in layer {layer:?}")]
    DuplicateView { layer: String, view: String },
}

/// A single named, typed column of a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub description: String,
    pub field_type: FieldType,
}

impl Field {
    /// Double-quoted SQL identifier.
    pub fn pg_name(&self) -> String {
        format!("\"{}\"", self.name)
    }

    /// The SELECT-list expression for this field inside a view's query.
    /// Geom fields reproject to EPSG:4326; everything else is a bare column.
    pub fn pg_view_select(&self) -> String {
        if self.field_type.is_geom() {
            format!("ST_Transform({}, 4326) AS {}", self.pg_name(), self.pg_name())
        } else {
            self.pg_name()
        }
    }
}

/// A named projection of a layer's fields, tied to one geom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct View {
    pub name: String,
    pub on_field: String,
    pub fields: Vec<String>,
    pub cache_duration_seconds: u64,
}

/// An ordered mapping of field/view names that preserves insertion order,
/// the way the source's `dict`-backed layer/config model does.
#[derive(Debug, Clone, Default)]
pub struct OrderedMap<V> {
    order: Vec<String>,
    map: HashMap<String, V>,
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: String, value: V) -> bool {
        if self.map.contains_key(&key) {
            return false;
        }
        self.order.push(key.clone());
        self.map.insert(key, value);
        true
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.order.iter().map(move |k| (k, self.map.get(k).unwrap()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.order.iter().map(move |k| self.map.get(k).unwrap())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A layer: a versioned PostGIS-backed table plus the views served over it.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub id_field: String,
    pub fields: OrderedMap<Field>,
    pub views: OrderedMap<View>,
    pub description: Option<String>,
    pub attribution: Option<String>,
}

impl Layer {
    pub fn pg_table_name(&self) -> String {
        self.name.clone()
    }

    /// `(None, "version", "varchar")` followed by `(Some(field), quoted, pg_type)`
    /// for each field in insertion order. The `version` column is implicit —
    /// never listed in `fields`, always the first column physically.
    pub fn pg_schema(&self) -> Vec<(Option<&Field>, String, String)> {
        let mut cols = vec![(None, "\"version\"".to_string(), "varchar".to_string())];
        for field in self.fields.values() {
            cols.push((Some(field), field.pg_name(), field.field_type.pg_type()));
        }
        cols
    }

    pub fn pg_field_names(&self) -> Vec<String> {
        self.pg_schema().into_iter().map(|(_, name, _)| name).collect()
    }

    /// A stable signature of the table's current column set, used to decide
    /// whether a migration needs to run at all.
    pub fn pg_table_sig(&self) -> String {
        self.pg_schema()
            .into_iter()
            .map(|(_, name, ty)| format!("{name}:{ty}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Every distinct geom field referenced by at least one view.
    pub fn geom_fields_in_views(&self) -> Vec<&Field> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for view in self.views.values() {
            if seen.insert(view.on_field.clone()) {
                if let Some(field) = self.fields.get(&view.on_field) {
                    out.push(field);
                }
            }
        }
        out
    }

    pub fn get_viewed_fields<'a>(&'a self, view: &'a View) -> Vec<&'a Field> {
        view.fields
            .iter()
            .filter_map(|name| self.fields.get(name))
            .collect()
    }
}

/// The immutable, process-wide compiled schema.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub description: String,
    pub layers: OrderedMap<Layer>,
}

// --- Serialized (wire/YAML) shapes, mirroring serialized_config.py ---

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerializedField {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub type_expr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerializedView {
    pub name: String,
    pub on_field: String,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_fields: Option<Vec<String>>,
    #[serde(default)]
    pub cache_duration: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerializedLayer {
    pub name: String,
    pub id_field_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attribution: Option<String>,
    pub fields: Vec<SerializedField>,
    pub views: Vec<SerializedView>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerializedConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub layers: Vec<SerializedLayer>,
}

const DEFAULT_CACHE_DURATION_SECONDS: u64 = 3600;

impl Config {
    /// Compiles a serialized document into a `Config`. Either the whole
    /// thing compiles and every invariant holds, or the first violation is
    /// reported.
    pub fn compile(raw: SerializedConfig) -> Result<Config, SchemaError> {
        let mut layers = OrderedMap::new();

        for raw_layer in raw.layers {
            let mut fields = OrderedMap::new();
            for raw_field in &raw_layer.fields {
                let field_type =
                    dsl::parse_str(&raw_field.type_expr).map_err(|source| SchemaError::Dsl {
                        field: raw_field.name.clone(),
                        source,
                    })?;
                fields.insert(
                    raw_field.name.clone(),
                    Field {
                        name: raw_field.name.clone(),
                        description: raw_field.description.clone(),
                        field_type,
                    },
                );
            }

            if !fields.contains_key(&raw_layer.id_field_name) {
                return Err(SchemaError::MissingIdField {
                    layer: raw_layer.name.clone(),
                    id_field: raw_layer.id_field_name.clone(),
                });
            }

            if !fields.values().any(|f| f.field_type.is_geom()) {
                return Err(SchemaError::NoGeomField {
                    layer: raw_layer.name.clone(),
                });
            }

            let mut views = OrderedMap::new();
            for raw_view in &raw_layer.views {
                let on_field = fields.get(&raw_view.on_field).ok_or_else(|| {
                    SchemaError::UnknownOnField {
                        layer: raw_layer.name.clone(),
                        view: raw_view.name.clone(),
                        on_field: raw_view.on_field.clone(),
                    }
                })?;
                if !on_field.field_type.is_geom() {
                    return Err(SchemaError::OnFieldNotGeom {
                        layer: raw_layer.name.clone(),
                        view: raw_view.name.clone(),
                        on_field: raw_view.on_field.clone(),
                    });
                }

                let mut view_fields = match &raw_view.fields {
                    Some(names) => names.clone(),
                    None => fields.keys().cloned().collect(),
                };
                for name in &view_fields {
                    if !fields.contains_key(name) {
                        return Err(SchemaError::UnknownViewField {
                            layer: raw_layer.name.clone(),
                            view: raw_view.name.clone(),
                            field: name.clone(),
                        });
                    }
                }
                if let Some(excluded) = &raw_view.exclude_fields {
                    view_fields.retain(|name| !excluded.contains(name));
                }

                let inserted = views.insert(
                    raw_view.name.clone(),
                    View {
                        name: raw_view.name.clone(),
                        on_field: raw_view.on_field.clone(),
                        fields: view_fields,
                        cache_duration_seconds: raw_view
                            .cache_duration
                            .unwrap_or(DEFAULT_CACHE_DURATION_SECONDS),
                    },
                );
                if !inserted {
                    return Err(SchemaError::DuplicateView {
                        layer: raw_layer.name.clone(),
                        view: raw_view.name.clone(),
                    });
                }
            }

            let inserted = layers.insert(
                raw_layer.name.clone(),
                Layer {
                    name: raw_layer.name.clone(),
                    id_field: raw_layer.id_field_name.clone(),
                    fields,
                    views,
                    description: raw_layer.description.clone(),
                    attribution: raw_layer.attribution.clone(),
                },
            );
            if !inserted {
                return Err(SchemaError::DuplicateLayer(raw_layer.name.clone()));
            }
        }

        Ok(Config {
            name: raw.name,
            description: raw.description,
            layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SerializedConfig {
        SerializedConfig {
            name: "chartis".to_string(),
            description: "".to_string(),
            layers: vec![SerializedLayer {
                name: "osrd_track_section".to_string(),
                id_field_name: "entity_id".to_string(),
                description: None,
                attribution: None,
                fields: vec![
                    SerializedField {
                        name: "entity_id".to_string(),
                        description: "".to_string(),
                        type_expr: "int".to_string(),
                    },
                    SerializedField {
                        name: "geom_geo".to_string(),
                        description: "".to_string(),
                        type_expr: "geom".to_string(),
                    },
                ],
                views: vec![SerializedView {
                    name: "geo".to_string(),
                    on_field: "geom_geo".to_string(),
                    fields: None,
                    exclude_fields: None,
                    cache_duration: None,
                }],
            }],
        }
    }

    #[test]
    fn compiles_valid_config() {
        let config = Config::compile(sample_config()).unwrap();
        let layer = config.layers.get("osrd_track_section").unwrap();
        assert_eq!(layer.id_field, "entity_id");
        let view = layer.views.get("geo").unwrap();
        assert_eq!(view.fields, vec!["entity_id", "geom_geo"]);
        assert_eq!(view.cache_duration_seconds, 3600);
    }

    #[test]
    fn pg_schema_has_implicit_version_first() {
        let config = Config::compile(sample_config()).unwrap();
        let layer = config.layers.get("osrd_track_section").unwrap();
        let schema = layer.pg_schema();
        assert_eq!(schema[0].1, "\"version\"");
        assert_eq!(schema[0].2, "varchar");
    }

    #[test]
    fn missing_id_field_is_rejected() {
        let mut raw = sample_config();
        raw.layers[0].id_field_name = "nonexistent".to_string();
        assert!(matches!(
            Config::compile(raw),
            Err(SchemaError::MissingIdField { .. })
        ));
    }

    #[test]
    fn layer_without_geom_field_is_rejected() {
        let mut raw = sample_config();
        raw.layers[0].fields.retain(|f| f.name != "geom_geo");
        raw.layers[0].views.clear();
        assert!(matches!(
            Config::compile(raw),
            Err(SchemaError::NoGeomField { .. })
        ));
    }

    #[test]
    fn view_on_non_geom_field_is_rejected() {
        let mut raw = sample_config();
        raw.layers[0].views[0].on_field = "entity_id".to_string();
        assert!(matches!(
            Config::compile(raw),
            Err(SchemaError::OnFieldNotGeom { .. })
        ));
    }

    #[test]
    fn view_exclude_fields_applied_after_include() {
        let mut raw = sample_config();
        raw.layers[0].views[0].exclude_fields = Some(vec!["entity_id".to_string()]);
        let config = Config::compile(raw).unwrap();
        let layer = config.layers.get("osrd_track_section").unwrap();
        let view = layer.views.get("geo").unwrap();
        assert_eq!(view.fields, vec!["geom_geo"]);
    }

    #[test]
    fn duplicate_layer_name_is_rejected() {
        let mut raw = sample_config();
        raw.layers.push(raw.layers[0].clone());
        assert!(matches!(
            Config::compile(raw),
            Err(SchemaError::DuplicateLayer(_))
        ));
    }
}
