//! Deterministic cache-key derivation. Pure functions over (layer, view,
//! version, tile) — no I/O, no interior mutability.

use crate::tilemath::AffectedTile;

/// `chartos.layer.<layer>.<view>.version_<version>`
pub fn view_cache_prefix(layer: &str, view: &str, version: &str) -> String {
    format!("chartos.layer.{layer}.{view}.version_{version}")
}

/// Appends the `.tile/<z>/<x>/<y>` suffix to a view prefix.
pub fn tile_key(prefix: &str, tile: AffectedTile) -> String {
    format!("{prefix}.tile/{}/{}/{}", tile.z, tile.x, tile.y)
}

/// The full key for one (layer, view, version, tile).
pub fn full_tile_key(layer: &str, view: &str, version: &str, tile: AffectedTile) -> String {
    tile_key(&view_cache_prefix(layer, view, version), tile)
}

/// The glob used for bulk purge. With `version`, scopes to that cohort;
/// without it, matches every version of the layer.
pub fn layer_wildcard(layer: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("chartos.layer.{layer}.*.version_{v}.tile/*"),
        None => format!("chartos.layer.{layer}.*"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_full_key() {
        let key = full_tile_key(
            "osrd_track_section",
            "geo",
            "test",
            AffectedTile { z: 14, x: 8299, y: 5632 },
        );
        assert_eq!(
            key,
            "chartos.layer.osrd_track_section.geo.version_test.tile/14/8299/5632"
        );
    }

    #[test]
    fn versioned_wildcard_scopes_to_version() {
        assert_eq!(
            layer_wildcard("osrd_track_section", Some("test")),
            "chartos.layer.osrd_track_section.*.version_test.tile/*"
        );
    }

    #[test]
    fn unversioned_wildcard_matches_whole_layer() {
        assert_eq!(
            layer_wildcard("osrd_track_section", None),
            "chartos.layer.osrd_track_section.*"
        );
    }
}
