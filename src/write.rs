//! WritePath: validate, translate, and execute insert/update/delete/truncate
//! against a layer, with geometry-aware cache invalidation.
//!
//! State machine per request: VALIDATE -> TRANSLATE -> FETCH_OLD_GEOM
//! (update/delete only) -> EXECUTE -> INVALIDATE -> REPORT. Any failure
//! before EXECUTE is a validation error with no side effects; a failure in
//! EXECUTE or INVALIDATE surfaces as a storage/cache error — the write may
//! have partially applied.

use std::collections::HashMap;

use deadpool_postgres::Object;
use geozero::geojson::GeoJson;
use geozero::wkt::WktWriter;
use geozero::{GeozeroGeometry, ToGeo};
use serde_json::Value;

use crate::cachekey::{full_tile_key, layer_wildcard};
use crate::error::{Result, TileServerError};
use crate::schema::{Field, FieldType, Layer};
use crate::tilecache::TileCache;
use crate::tilemath::{find_affected_tiles, reproject_3857_to_4326, AffectedTile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// The result of a push, reported back over HTTP. For `truncate`, every
/// view maps to the single wildcard marker rather than an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImpactedTiles {
    Tiles(HashMap<String, Vec<AffectedTile>>),
    Wildcard(Vec<String>),
}

/// The EPSG:3857 CRS object GeoJSON payloads are assumed to carry when no
/// `crs` member is present.
fn is_epsg_3857_crs(value: &Value) -> bool {
    value
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(|name| name == "EPSG:3857" || name.ends_with("3857"))
        .unwrap_or(false)
}

/// Parses a GeoJSON geometry value, defaulting its CRS to EPSG:3857 when
/// absent, and returns both the parsed geometry (for tile-affect
/// computation) and its EWKT text (for SQL binding).
fn parse_geom_value(value: &Value) -> Result<(geo::Geometry<f64>, String)> {
    if let Some(crs) = value.get("crs") {
        if !is_epsg_3857_crs(crs) {
            return Err(TileServerError::validation(
                "geometry fields only support EPSG:3857 (or no CRS, defaulted to EPSG:3857)",
            ));
        }
    }

    let mut stripped = value.clone();
    if let Value::Object(ref mut map) = stripped {
        map.remove("crs");
    }
    let text = stripped.to_string();
    let geojson = GeoJson(&text);

    let geom: geo::Geometry<f64> = geojson
        .to_geo()
        .map_err(|e| TileServerError::validation(format!("invalid geometry: {e}")))?;

    let mut wkt_bytes = Vec::new();
    {
        let mut writer = WktWriter::new(&mut wkt_bytes);
        geojson
            .process_geom(&mut writer)
            .map_err(|e| TileServerError::validation(format!("invalid geometry: {e}")))?;
    }
    let wkt = String::from_utf8(wkt_bytes).expect("WktWriter emits valid UTF-8");

    Ok((geom, format!("SRID=3857;{wkt}")))
}

fn escape_sql_literal(s: &str) -> String {
    s.replace('\'', "''")
}

fn postgres_array_literal(values: &[Value]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    format!("'{{{}}}'", items.join(","))
}

/// Renders one field's value as a SQL literal expression suitable for
/// direct interpolation into an INSERT/UPDATE statement.
fn encode_value(field: &Field, value: &Value) -> Result<(String, Option<geo::Geometry<f64>>)> {
    match (&field.field_type, value) {
        (FieldType::Geom, _) => {
            let (geom, ewkt) = parse_geom_value(value)?;
            Ok((format!("'{}'::geometry", escape_sql_literal(&ewkt)), Some(geom)))
        }
        (FieldType::Text | FieldType::String { .. } | FieldType::Char { .. }, Value::String(s)) => {
            Ok((format!("'{}'", escape_sql_literal(s)), None))
        }
        (FieldType::Timestamp, Value::String(s)) => {
            Ok((format!("'{}'", escape_sql_literal(s)), None))
        }
        (FieldType::Int | FieldType::BigInt, Value::Number(n)) => Ok((n.to_string(), None)),
        (FieldType::Double, Value::Number(n)) => Ok((n.to_string(), None)),
        (FieldType::Bool, Value::Bool(b)) => Ok((b.to_string(), None)),
        (FieldType::Json, Value::Object(_) | Value::Array(_)) => {
            Ok((format!("'{}'::jsonb", escape_sql_literal(&value.to_string())), None))
        }
        (FieldType::Array { .. }, Value::Array(items)) => {
            Ok((format!("{}::{}", postgres_array_literal(items), field.field_type.pg_type()), None))
        }
        _ => Err(TileServerError::validation(format!(
            "value for field {:?} is not structurally compatible with its declared type",
            field.name
        ))),
    }
}

pub struct WritePath;

impl WritePath {
    /// VALIDATE: every key in a row must name a layer field. `insert` also
    /// requires id_field and every view's on_field to be present.
    fn validate_payload(
        layer: &Layer,
        rows: &[Value],
        change_type: ChangeType,
    ) -> Result<Vec<serde_json::Map<String, Value>>> {
        let valid_fields: Vec<String> = layer.fields.keys().cloned().collect();

        let mut mandatory: Vec<String> = vec![layer.id_field.clone()];
        if change_type == ChangeType::Insert {
            for view in layer.views.values() {
                if !mandatory.contains(&view.on_field) {
                    mandatory.push(view.on_field.clone());
                }
            }
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let map = row.as_object().ok_or_else(|| {
                TileServerError::validation("each row must be a JSON object")
            })?;

            for key in map.keys() {
                if !valid_fields.contains(key) {
                    return Err(TileServerError::validation_with_choices(
                        format!("unknown field {key:?}"),
                        valid_fields.clone(),
                    ));
                }
            }

            for required in &mandatory {
                if !map.contains_key(required) {
                    return Err(TileServerError::validation_with_choices(
                        format!("missing mandatory field {required:?}"),
                        mandatory.clone(),
                    ));
                }
            }

            out.push(map.clone());
        }
        Ok(out)
    }

    /// The full insert/update/delete path. Returns the per-view set of
    /// affected tiles.
    pub async fn apply(
        conn: &Object,
        cache: &TileCache,
        layer: &Layer,
        version: &str,
        change_type: ChangeType,
        rows: Vec<Value>,
        zmax: u8,
    ) -> Result<ImpactedTiles> {
        // VALIDATE
        let rows = Self::validate_payload(layer, &rows, change_type)?;

        let mut affected: HashMap<String, Vec<AffectedTile>> = HashMap::new();
        let mut statements: Vec<String> = Vec::new();

        // TRANSLATE, accumulating affected tiles for submitted geometry.
        for row in &rows {
            let (stmt, row_geoms) = Self::translate_row(layer, version, change_type, row)?;
            statements.push(stmt);
            for (field_name, mut geom) in row_geoms {
                reproject_3857_to_4326(&mut geom);
                for view in layer.views.values() {
                    if view.on_field == field_name {
                        affected
                            .entry(view.name.clone())
                            .or_default()
                            .extend(find_affected_tiles(zmax, &geom));
                    }
                }
            }
        }

        // FETCH_OLD_GEOM (update/delete only): the previous geometry matters
        // because removing or moving a feature invalidates tiles it used to
        // touch. Coalesced with UNION across rows, per view.
        if change_type != ChangeType::Insert {
            let mut fetch_queries: HashMap<String, Vec<String>> = HashMap::new();
            for row in &rows {
                let id_value = row
                    .get(&layer.id_field)
                    .expect("id_field presence checked by validate_payload");
                let id_field = layer.fields.get(&layer.id_field).unwrap();
                let (id_literal, _) = encode_value(id_field, id_value)?;
                for view in layer.views.values() {
                    let on_field = layer.fields.get(&view.on_field).unwrap();
                    fetch_queries.entry(view.name.clone()).or_default().push(format!(
                        "SELECT ST_AsText({}) FROM \"{}\" WHERE {} = {} AND \"version\" = '{}'",
                        on_field.pg_name(),
                        layer.pg_table_name(),
                        id_field.pg_name(),
                        id_literal,
                        escape_sql_literal(version)
                    ));
                }
            }

            for (view_name, selects) in fetch_queries {
                let query = selects.join(" UNION ");
                let result_rows = conn.query(&query, &[]).await?;
                for result_row in result_rows {
                    let wkt_text: Option<String> = result_row.try_get(0).ok();
                    if let Some(wkt_text) = wkt_text {
                        if let Ok(mut geom) = parse_ewkt_to_geo(&wkt_text) {
                            reproject_3857_to_4326(&mut geom);
                            affected
                                .entry(view_name.clone())
                                .or_default()
                                .extend(find_affected_tiles(zmax, &geom));
                        }
                    }
                }
            }
        }

        // EXECUTE: a single semicolon-joined batch.
        if !statements.is_empty() {
            let batch = statements.join(";\n");
            conn.batch_execute(&batch).await?;
        }

        // INVALIDATE
        for (view_name, tiles) in &affected {
            let keys: Vec<String> = tiles
                .iter()
                .map(|t| full_tile_key(&layer.name, view_name, version, *t))
                .collect();
            cache.delete(&keys).await?;
        }

        Ok(ImpactedTiles::Tiles(affected))
    }

    fn translate_row(
        layer: &Layer,
        version: &str,
        change_type: ChangeType,
        row: &serde_json::Map<String, Value>,
    ) -> Result<(String, Vec<(String, geo::Geometry<f64>)>)> {
        let table = layer.pg_table_name();
        let mut row_geoms = Vec::new();

        match change_type {
            ChangeType::Insert => {
                let mut columns = vec!["\"version\"".to_string()];
                let mut literals = vec![format!("'{}'", escape_sql_literal(version))];
                for (name, value) in row {
                    let field = layer.fields.get(name).expect("validated field name");
                    let (literal, geom) = encode_value(field, value)?;
                    if let Some(geom) = geom {
                        row_geoms.push((name.clone(), geom));
                    }
                    columns.push(field.pg_name());
                    literals.push(literal);
                }
                Ok((
                    format!(
                        "INSERT INTO \"{table}\" ({}) VALUES ({})",
                        columns.join(", "),
                        literals.join(", ")
                    ),
                    row_geoms,
                ))
            }
            ChangeType::Update => {
                let id_field = layer.fields.get(&layer.id_field).unwrap();
                let (id_literal, _) = encode_value(id_field, row.get(&layer.id_field).unwrap())?;
                let mut assignments = Vec::new();
                for (name, value) in row {
                    if name == &layer.id_field {
                        continue;
                    }
                    let field = layer.fields.get(name).expect("validated field name");
                    let (literal, geom) = encode_value(field, value)?;
                    if let Some(geom) = geom {
                        row_geoms.push((name.clone(), geom));
                    }
                    assignments.push(format!("{} = {}", field.pg_name(), literal));
                }
                if assignments.is_empty() {
                    return Err(TileServerError::validation(
                        "update row must set at least one field besides id_field",
                    ));
                }
                Ok((
                    format!(
                        "UPDATE \"{table}\" SET {} WHERE {} = {} AND \"version\" = '{}'",
                        assignments.join(", "),
                        id_field.pg_name(),
                        id_literal,
                        escape_sql_literal(version)
                    ),
                    row_geoms,
                ))
            }
            ChangeType::Delete => {
                let id_field = layer.fields.get(&layer.id_field).unwrap();
                let (id_literal, _) = encode_value(id_field, row.get(&layer.id_field).unwrap())?;
                Ok((
                    format!(
                        "DELETE FROM \"{table}\" WHERE {} = {} AND \"version\" = '{}'",
                        id_field.pg_name(),
                        id_literal,
                        escape_sql_literal(version)
                    ),
                    row_geoms,
                ))
            }
        }
    }

    /// `DELETE FROM <table> WHERE version = $1`, then a full-layer purge.
    /// Reported as a wildcard rather than an enumeration.
    pub async fn truncate(
        conn: &Object,
        cache: &TileCache,
        layer: &Layer,
        version: &str,
    ) -> Result<ImpactedTiles> {
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"version\" = '{}'",
            layer.pg_table_name(),
            escape_sql_literal(version)
        );
        conn.batch_execute(&sql).await?;

        let pattern = layer_wildcard(&layer.name, Some(version));
        cache.purge_prefix(&pattern).await?;

        let views: Vec<String> = layer.views.keys().cloned().collect();
        Ok(ImpactedTiles::Wildcard(views))
    }
}

/// Parses the `ST_AsText(...)` output of an old-geometry fetch query. The
/// fetched column is in EPSG:3857 (the storage SRID); callers reproject with
/// `reproject_3857_to_4326` before handing it to `find_affected_tiles`.
fn parse_ewkt_to_geo(wkt_text: &str) -> std::result::Result<geo::Geometry<f64>, anyhow::Error> {
    use geozero::wkt::Wkt;
    let wkt = Wkt(wkt_text);
    wkt.to_geo().map_err(anyhow::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Config, SerializedConfig, SerializedField, SerializedLayer, SerializedView};

    fn sample_config() -> Config {
        Config::compile(SerializedConfig {
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
        })
        .unwrap()
    }

    #[test]
    fn insert_requires_id_field_and_on_field() {
        let config = sample_config();
        let layer = config.layers.get("osrd_track_section").unwrap();
        let rows = vec![serde_json::json!({ "entity_id": 1 })];
        let err = WritePath::validate_payload(layer, &rows, ChangeType::Insert).unwrap_err();
        assert!(matches!(err, TileServerError::ValidationError { .. }));
    }

    #[test]
    fn insert_rejects_unknown_field() {
        let config = sample_config();
        let layer = config.layers.get("osrd_track_section").unwrap();
        let rows = vec![serde_json::json!({ "entity_id": 1, "geom_geo": {}, "bogus": 1 })];
        let err = WritePath::validate_payload(layer, &rows, ChangeType::Insert).unwrap_err();
        assert!(matches!(err, TileServerError::ValidationError { .. }));
    }

    #[test]
    fn delete_only_requires_id_field() {
        let config = sample_config();
        let layer = config.layers.get("osrd_track_section").unwrap();
        let rows = vec![serde_json::json!({ "entity_id": 1 })];
        assert!(WritePath::validate_payload(layer, &rows, ChangeType::Delete).is_ok());
    }

    #[test]
    fn translate_insert_produces_insert_statement() {
        let config = sample_config();
        let layer = config.layers.get("osrd_track_section").unwrap();
        let row = serde_json::json!({
            "entity_id": 1,
            "geom_geo": { "type": "Point", "coordinates": [1.0, 2.0] }
        });
        let (sql, geoms) = WritePath::translate_row(
            layer,
            "test",
            ChangeType::Insert,
            row.as_object().unwrap(),
        )
        .unwrap();
        assert!(sql.starts_with("INSERT INTO \"osrd_track_section\""));
        assert!(sql.contains("SRID=3857"));
        assert_eq!(geoms.len(), 1);
    }

    #[test]
    fn geom_with_non_3857_crs_is_rejected() {
        let value = serde_json::json!({
            "type": "Point",
            "coordinates": [1.0, 2.0],
            "crs": { "type": "name", "properties": { "name": "EPSG:4326" } }
        });
        assert!(parse_geom_value(&value).is_err());
    }
}
