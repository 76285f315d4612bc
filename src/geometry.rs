//! Display-space ↔ native-space coordinate transforms.
//!
//! A point query arrives in the coordinate space of whatever surface the user
//! clicked (a scaled `<video>` or `<img>`); the model ran on the native frame.
//! The transform is a pure per-axis scale. Geometry is always passed in
//! explicitly, captured at the same instant as the point. A geometry read after
//! the surface was resized gives a wrong answer that nothing here can detect.

use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Mapping context for one query. Not persisted.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayGeometry {
    pub display_width: f64,
    pub display_height: f64,
    pub native_width: f64,
    pub native_height: f64,
}

impl DisplayGeometry {
    pub fn new(display_width: f64, display_height: f64, native_width: f64, native_height: f64) -> Self {
        Self {
            display_width,
            display_height,
            native_width,
            native_height,
        }
    }

    /// Check all four dimensions are finite and strictly positive.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("displayWidth", self.display_width),
            ("displayHeight", self.display_height),
            ("nativeWidth", self.native_width),
            ("nativeHeight", self.native_height),
        ];
        for (name, value) in dims {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidGeometry(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    fn native_per_display(&self) -> Result<(f64, f64)> {
        self.validate()?;
        Ok((
            self.native_width / self.display_width,
            self.native_height / self.display_height,
        ))
    }
}

/// Display-space point → native frame pixels.
pub fn to_native(point: Point, geometry: &DisplayGeometry) -> Result<Point> {
    check_point(point)?;
    geometry.validate()?;
    Ok(Point::new(
        point.x * geometry.native_width / geometry.display_width,
        point.y * geometry.native_height / geometry.display_height,
    ))
}

/// Native frame pixels → display-space point. Exact inverse of `to_native`.
pub fn to_display(point: Point, geometry: &DisplayGeometry) -> Result<Point> {
    check_point(point)?;
    geometry.validate()?;
    Ok(Point::new(
        point.x * geometry.display_width / geometry.native_width,
        point.y * geometry.display_height / geometry.native_height,
    ))
}

pub fn bbox_to_display(bbox: &BoundingBox, geometry: &DisplayGeometry) -> Result<BoundingBox> {
    let (sx, sy) = geometry.native_per_display()?;
    Ok(BoundingBox::new(
        bbox.x1 / sx,
        bbox.y1 / sy,
        bbox.x2 / sx,
        bbox.y2 / sy,
    ))
}

pub fn bbox_to_native(bbox: &BoundingBox, geometry: &DisplayGeometry) -> Result<BoundingBox> {
    let (sx, sy) = geometry.native_per_display()?;
    Ok(BoundingBox::new(
        bbox.x1 * sx,
        bbox.y1 * sy,
        bbox.x2 * sx,
        bbox.y2 * sy,
    ))
}

fn check_point(point: Point) -> Result<()> {
    if point.x.is_finite() && point.y.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidGeometry(format!(
            "query point ({}, {}) is not finite",
            point.x, point.y
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < EPS && (a.y - b.y).abs() < EPS
    }

    #[test]
    fn scales_display_click_to_native() {
        // 1920x1080 camera shown at 640x360
        let g = DisplayGeometry::new(640.0, 360.0, 1920.0, 1080.0);
        let p = to_native(Point::new(100.0, 50.0), &g).unwrap();
        assert!(close(p, Point::new(300.0, 150.0)));
    }

    #[test]
    fn round_trip_over_many_geometries() {
        let geometries = [
            DisplayGeometry::new(640.0, 480.0, 1280.0, 960.0),
            DisplayGeometry::new(333.0, 777.0, 1920.0, 1080.0),
            DisplayGeometry::new(1.0, 1.0, 4096.0, 2160.0),
            DisplayGeometry::new(3000.0, 2000.0, 640.0, 480.0),
        ];
        let points = [
            Point::new(0.0, 0.0),
            Point::new(0.5, 0.25),
            Point::new(123.456, 78.9),
            Point::new(640.0, 480.0),
        ];
        for g in &geometries {
            for p in points {
                let back = to_display(to_native(p, g).unwrap(), g).unwrap();
                assert!(
                    (back.x - p.x).abs() < 1e-6 && (back.y - p.y).abs() < 1e-6,
                    "{:?} -> {:?} via {:?}",
                    p,
                    back,
                    g
                );
            }
        }
    }

    #[test]
    fn zero_display_width_is_invalid_geometry() {
        let g = DisplayGeometry::new(0.0, 480.0, 1280.0, 960.0);
        let err = to_native(Point::new(1.0, 1.0), &g).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
        assert_eq!(err.code(), "invalid_geometry");
    }

    #[test]
    fn zero_native_or_nan_is_invalid() {
        let g = DisplayGeometry::new(640.0, 480.0, 0.0, 960.0);
        assert!(to_display(Point::new(1.0, 1.0), &g).is_err());
        let g = DisplayGeometry::new(640.0, f64::NAN, 1280.0, 960.0);
        assert!(to_native(Point::new(1.0, 1.0), &g).is_err());
        let g = DisplayGeometry::new(640.0, 480.0, 1280.0, 960.0);
        assert!(to_native(Point::new(f64::INFINITY, 1.0), &g).is_err());
    }

    #[test]
    fn boxes_follow_points() {
        let g = DisplayGeometry::new(320.0, 240.0, 640.0, 480.0);
        let native = BoundingBox::new(100.0, 50.0, 300.0, 200.0);
        let shown = bbox_to_display(&native, &g).unwrap();
        assert_eq!(<[f64; 4]>::from(shown), [50.0, 25.0, 150.0, 100.0]);
        assert_eq!(bbox_to_native(&shown, &g).unwrap(), native);
    }

    #[test]
    fn geometry_uses_camel_case_on_the_wire() {
        let g: DisplayGeometry = serde_json::from_str(
            r#"{"displayWidth":640,"displayHeight":360,"nativeWidth":1920,"nativeHeight":1080}"#,
        )
        .unwrap();
        assert_eq!(g, DisplayGeometry::new(640.0, 360.0, 1920.0, 1080.0));
    }
}
