//! Composes and executes the SQL that returns one MVT blob for
//! (layer, view, z, x, y).

use deadpool_postgres::Object;

use crate::error::Result;
use crate::schema::{Layer, View};

pub struct MvtBuilder;

impl MvtBuilder {
    /// Builds the tile query for one view. Every `view.fields` entry,
    /// including on_field, is projected through `pg_view_select`; on_field
    /// is additionally fed to `ST_AsMVTGeom` in its native SRID to build the
    /// tile geometry. Positional params are $1=z, $2=x, $3=y, and $4=version
    /// when version filtering is active.
    pub fn build_query(layer: &Layer, view: &View, version: &str) -> String {
        let on_field = layer
            .fields
            .get(&view.on_field)
            .expect("view.on_field is validated at schema-compile time");

        // Every view field is projected, including on_field itself — it
        // carries on both as a plain attribute column and, separately
        // below, as the geometry ST_AsMVTGeom builds the tile from.
        let select_list = layer
            .get_viewed_fields(view)
            .into_iter()
            .map(|f| f.pg_view_select())
            .collect::<Vec<_>>()
            .join(",\n              ");

        let select_list = if select_list.is_empty() {
            String::new()
        } else {
            format!("{select_list},\n              ")
        };

        let version_filter = if version.is_empty() {
            String::new()
        } else {
            "\n         AND \"version\" = $4".to_string()
        };

        format!(
            "WITH bbox AS (SELECT TileBBox($1,$2,$3,3857) AS geom),\n\
             \x20    tile_content AS (\n\
             \x20      SELECT {select_list}ST_AsMVTGeom({on_field}, bbox.geom, 4096, 64, true) AS mvtgeom\n\
             \x20      FROM \"{table}\", bbox\n\
             \x20      WHERE {on_field} && bbox.geom\n\
             \x20        AND ST_GeometryType({on_field}) != 'ST_GeometryCollection'{version_filter}\n\
             \x20    )\n\
             SELECT ST_AsMVT(tile_content, '{layer_name}') FROM tile_content",
            select_list = select_list,
            on_field = on_field.pg_name(),
            table = layer.pg_table_name(),
            version_filter = version_filter,
            layer_name = layer.name,
        )
    }

    /// Executes the query against a connection and returns the MVT payload.
    /// PostGIS returns an empty (but non-null) blob when nothing matches.
    pub async fn render_tile(
        conn: &Object,
        layer: &Layer,
        view: &View,
        z: u8,
        x: u32,
        y: u32,
        version: &str,
    ) -> Result<Vec<u8>> {
        let sql = Self::build_query(layer, view, version);
        let row = if version.is_empty() {
            conn.query_one(&sql, &[&(z as i32), &(x as i32), &(y as i32)])
                .await?
        } else {
            conn.query_one(&sql, &[&(z as i32), &(x as i32), &(y as i32), &version])
                .await?
        };
        let bytes: Vec<u8> = row.get(0);
        Ok(bytes)
    }
}
