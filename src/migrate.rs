//! Idempotent DDL: table creation, column migration, indexes, and the
//! `TileBBox` helper function, driven off a compiled `Config`.

use deadpool_postgres::Object;

use crate::error::Result;
use crate::schema::{Config, Layer};

const TILEBBOX_FUNCTION: &str = r#"
CREATE OR REPLACE FUNCTION TileBBox(z int, x int, y int, srid int = 3857)
RETURNS geometry
LANGUAGE plpgsql IMMUTABLE AS
$$
DECLARE
    max numeric := 20037508.34;
    res numeric := (max*2)/(2^z);
    bbox geometry;
BEGIN
    bbox := ST_MakeEnvelope(
        -max + (x * res),
        max - (y * res),
        -max + ((x+1) * res),
        max - ((y+1) * res),
        3857
    );
    IF srid = 3857 THEN
        RETURN bbox;
    ELSE
        RETURN ST_Transform(bbox, srid);
    END IF;
END;
$$;
"#;

pub struct Migrator;

impl Migrator {
    /// Runs every layer's migration in config iteration order, on a single
    /// connection. A failure is fatal to startup.
    pub async fn run(conn: &Object, config: &Config) -> Result<()> {
        for layer in config.layers.values() {
            Self::migrate_layer(conn, layer).await?;
        }
        conn.batch_execute(TILEBBOX_FUNCTION).await?;
        Ok(())
    }

    async fn migrate_layer(conn: &Object, layer: &Layer) -> Result<()> {
        let table = layer.pg_table_name();

        let column_defs = layer
            .pg_schema()
            .into_iter()
            .map(|(_, name, pg_type)| format!("{name} {pg_type}"))
            .collect::<Vec<_>>()
            .join(",\n    ");
        let create = format!("CREATE TABLE IF NOT EXISTS \"{table}\" (\n    {column_defs}\n);");
        conn.batch_execute(&create).await?;

        let add_columns = layer
            .pg_schema()
            .into_iter()
            .map(|(_, name, pg_type)| format!("ADD COLUMN IF NOT EXISTS {name} {pg_type}"))
            .collect::<Vec<_>>()
            .join(",\n    ");
        let alter = format!("ALTER TABLE \"{table}\"\n    {add_columns};");
        conn.batch_execute(&alter).await?;

        for geom_field in layer.geom_fields_in_views() {
            let index_name = format!("{table}_{}_spgist", geom_field.name);
            let index = format!(
                "CREATE INDEX IF NOT EXISTS \"{index_name}\" ON \"{table}\" USING SPGIST ({});",
                geom_field.pg_name()
            );
            conn.batch_execute(&index).await?;
        }

        let version_index = format!(
            "CREATE INDEX IF NOT EXISTS \"{table}_version\" ON \"{table}\" USING BTREE (\"version\");"
        );
        conn.batch_execute(&version_index).await?;

        Ok(())
    }
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
    fn tilebbox_function_has_reproject_branch() {
        assert!(TILEBBOX_FUNCTION.contains("ST_Transform(bbox, srid)"));
        assert!(TILEBBOX_FUNCTION.contains("IMMUTABLE"));
    }

    #[test]
    fn layer_schema_lists_implicit_version_column_first() {
        let config = sample_config();
        let layer = config.layers.get("osrd_track_section").unwrap();
        let schema = layer.pg_schema();
        assert_eq!(schema[0].1, "\"version\"");
    }
}
