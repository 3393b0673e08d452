//! Web-Mercator tile <-> lon/lat math and the quadtree affected-tile walk.

use geo::{Coord, Geometry, Intersects, MapCoordsInPlace, Rect};

/// A single Web-Mercator tile at zoom `z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AffectedTile {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

/// Maps (lat, lon) at zoom `z` to the tile that contains it.
pub fn tile_of(lat: f64, lon: f64, z: u8) -> (u32, u32) {
    let n = 2f64.powi(z as i32);
    let x = ((lon + 180.0) / 360.0 * n).floor() as u32;
    let lat_rad = lat.to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * n).floor() as u32;
    (x, y)
}

/// Inverse of `tile_of`: the lat/lon of tile (z, x, y)'s northwest corner.
pub fn nw_corner(z: u8, x: u32, y: u32) -> (f64, f64) {
    let n = 2f64.powi(z as i32);
    let lon = x as f64 / n * 360.0 - 180.0;
    let lat_rad = (std::f64::consts::PI * (1.0 - 2.0 * y as f64 / n)).sinh().atan();
    (lat_rad.to_degrees(), lon)
}

const WEB_MERCATOR_EARTH_RADIUS_X_PI: f64 = 20037508.34;

/// Inverse Web-Mercator projection: EPSG:3857 meters to EPSG:4326 degrees.
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = x / WEB_MERCATOR_EARTH_RADIUS_X_PI * 180.0;
    let lat = (y / WEB_MERCATOR_EARTH_RADIUS_X_PI * std::f64::consts::PI)
        .sinh()
        .atan()
        .to_degrees();
    (lon, lat)
}

/// Reprojects every coordinate of `geom` from EPSG:3857 to EPSG:4326 in
/// place. Feature geometries are stored and submitted in EPSG:3857; tile
/// affect computation always operates in EPSG:4326.
pub fn reproject_3857_to_4326(geom: &mut Geometry<f64>) {
    geom.map_coords_in_place(|coord| {
        let (lon, lat) = mercator_to_lonlat(coord.x, coord.y);
        Coord { x: lon, y: lat }
    });
}

fn tile_bbox(z: u8, x: u32, y: u32) -> Rect<f64> {
    let (nw_lat, nw_lon) = nw_corner(z, x, y);
    let (se_lat, se_lon) = nw_corner(z, x + 1, y + 1);
    Rect::new(
        Coord { x: nw_lon, y: se_lat },
        Coord { x: se_lon, y: nw_lat },
    )
}

/// Enumerates every tile at z = 0..=zmax whose bounding box intersects
/// `geom`. `geom` must already be in EPSG:4326. The recursion is bounded by
/// the number of tiles the geometry actually touches, not by 4^zmax: a node
/// whose bbox doesn't intersect the geometry is pruned without visiting its
/// children.
pub fn find_affected_tiles(zmax: u8, geom: &Geometry<f64>) -> Vec<AffectedTile> {
    let mut out = Vec::new();
    descend(zmax, 0, 0, 0, geom, &mut out);
    out
}

fn descend(zmax: u8, z: u8, x: u32, y: u32, geom: &Geometry<f64>, out: &mut Vec<AffectedTile>) {
    let bbox = tile_bbox(z, x, y);
    if !geom_intersects_rect(geom, &bbox) {
        return;
    }
    out.push(AffectedTile { z, x, y });
    if z < zmax {
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            descend(zmax, z + 1, x * 2 + dx, y * 2 + dy, geom, out);
        }
    }
}

fn geom_intersects_rect(geom: &Geometry<f64>, rect: &Rect<f64>) -> bool {
    geom.intersects(&rect.to_polygon())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, LineString};

    #[test]
    fn tile_of_inverts_nw_corner() {
        for z in [0u8, 3, 10, 18, 22] {
            for (x, y) in [(0u32, 0u32), (1, 1), (3, 2)] {
                let n = 1u32 << z;
                if x >= n || y >= n {
                    continue;
                }
                let (lat, lon) = nw_corner(z, x, y);
                assert_eq!(tile_of(lat, lon, z), (x, y), "z={z} x={x} y={y}");

                let (lat2, lon2) = nw_corner(z, x + 1, y + 1);
                assert_eq!(tile_of(lat2, lon2, z), (x + 1, y + 1));
            }
        }
    }

    #[test]
    fn mercator_origin_is_null_island() {
        let (lon, lat) = mercator_to_lonlat(0.0, 0.0);
        assert!(lon.abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
    }

    #[test]
    fn world_point_is_affected_at_every_zoom_up_to_zmax() {
        let geom = Geometry::Point(point! { x: 2.0, y: 48.0 });
        let tiles = find_affected_tiles(5, &geom);
        let zooms: std::collections::HashSet<u8> = tiles.iter().map(|t| t.z).collect();
        assert_eq!(zooms, (0..=5).collect());
    }

    #[test]
    fn every_emitted_tile_ancestor_is_also_emitted() {
        let geom = Geometry::LineString(LineString::from(vec![(2.0, 48.0), (2.4, 48.4)]));
        let tiles = find_affected_tiles(8, &geom);
        let set: std::collections::HashSet<(u8, u32, u32)> =
            tiles.iter().map(|t| (t.z, t.x, t.y)).collect();
        for tile in &tiles {
            if tile.z == 0 {
                continue;
            }
            let parent = (tile.z - 1, tile.x / 2, tile.y / 2);
            assert!(set.contains(&parent), "missing ancestor {parent:?} of {tile:?}");
        }
    }
}
