//! Arena calibration context
//!
//! Pixel scale, arena outline and the maze-specific wall geometry of a session.

use serde::{Deserialize, Serialize};

use crate::geometry::{point_in_polygon, vertex_centroid};
use crate::types::Point;

/// Arena floor outline in image coordinates (pixels)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ArenaShape {
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Circle {
        cx: f64,
        cy: f64,
        radius: f64,
    },
    Polygon {
        vertices: Vec<[f64; 2]>,
    },
}

impl ArenaShape {
    /// Whether the pixel centre `(x, y)` lies on the arena floor
    pub fn contains(&self, p: &Point) -> bool {
        match self {
            ArenaShape::Rectangle {
                x,
                y,
                width,
                height,
            } => p.x >= *x && p.x < x + width && p.y >= *y && p.y < y + height,
            ArenaShape::Circle { cx, cy, radius } => {
                (p.x - cx).hypot(p.y - cy) <= *radius
            }
            ArenaShape::Polygon { vertices } => point_in_polygon(p, &to_points(vertices)),
        }
    }

    /// Geometric centre of the arena floor
    pub fn centre(&self) -> Point {
        match self {
            ArenaShape::Rectangle {
                x,
                y,
                width,
                height,
            } => Point::new(x + width / 2.0, y + height / 2.0),
            ArenaShape::Circle { cx, cy, .. } => Point::new(*cx, *cy),
            ArenaShape::Polygon { vertices } => {
                vertex_centroid(&to_points(vertices)).unwrap_or(Point::new(0.0, 0.0))
            }
        }
    }
}

/// Convert `[x, y]` pairs into points
pub fn to_points(raw: &[[f64; 2]]) -> Vec<Point> {
    raw.iter().map(|[x, y]| Point::new(*x, *y)).collect()
}

/// Geometry and scale of one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationContext {
    pub pixels_per_cm: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub arena: ArenaShape,
    /// Closed-arm polygons (elevated plus maze)
    #[serde(default)]
    pub closed_arms: Vec<Vec<Point>>,
    /// Dividing wall polygon (light/dark box)
    #[serde(default)]
    pub middle_wall: Option<Vec<Point>>,
}

impl CalibrationContext {
    /// Whether a position lies inside the video frame
    pub fn in_frame(&self, p: &Point) -> bool {
        p.x >= 0.0
            && p.y >= 0.0
            && p.x < self.frame_width as f64
            && p.y < self.frame_height as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_shapes_contain() {
        let rect = ArenaShape::Rectangle {
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 50.0,
        };
        assert!(rect.contains(&Point::new(50.0, 30.0)));
        assert!(!rect.contains(&Point::new(5.0, 30.0)));

        let circle = ArenaShape::Circle {
            cx: 0.0,
            cy: 0.0,
            radius: 5.0,
        };
        assert!(circle.contains(&Point::new(3.0, 4.0)));
        assert!(!circle.contains(&Point::new(4.0, 4.0)));

        let tri = ArenaShape::Polygon {
            vertices: vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]],
        };
        assert!(tri.contains(&Point::new(2.0, 2.0)));
        assert!(!tri.contains(&Point::new(8.0, 8.0)));
    }

    #[test]
    fn test_arena_shape_json_tagging() {
        let shape: ArenaShape =
            serde_json::from_str(r#"{"shape": "circle", "cx": 1.0, "cy": 2.0, "radius": 3.0}"#)
                .unwrap();
        assert_eq!(
            shape,
            ArenaShape::Circle {
                cx: 1.0,
                cy: 2.0,
                radius: 3.0
            }
        );
    }
}
