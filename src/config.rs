//! Loads the YAML layer schema document off disk and compiles it.

use std::path::Path;

use crate::error::{Result, TileServerError};
use crate::schema::{Config, SerializedConfig};

pub async fn load_config(path: &Path) -> Result<Config> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TileServerError::SchemaError(format!("reading {}: {e}", path.display())))?;

    let raw: SerializedConfig = serde_yaml::from_str(&text)
        .map_err(|e| TileServerError::SchemaError(format!("parsing {}: {e}", path.display())))?;

    Config::compile(raw).map_err(|e| TileServerError::SchemaError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sample_document() {
        let yaml = r#"
name: chartis
description: "demo"
layers:
  - name: osrd_track_section
    id_field_name: entity_id
    fields:
      - name: entity_id
        description: ""
        type: int
      - name: geom_geo
        description: ""
        type: geom
    views:
      - name: geo
        on_field: geom_geo
"#;
        let raw: SerializedConfig = serde_yaml::from_str(yaml).unwrap();
        let config = Config::compile(raw).unwrap();
        assert_eq!(config.name, "chartis");
        assert!(config.layers.get("osrd_track_section").is_some());
    }
}
