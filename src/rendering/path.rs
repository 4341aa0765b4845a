//! Path construction for the `m l c v y h re` operators.
//!
//! Coordinates are stored in the space they were given in (user space for
//! content streams, glyph units for font outlines); devices receive the
//! transform separately.

use super::graphics_state::Matrix;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathElement {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    /// Cubic Bézier (cp1x, cp1y, cp2x, cp2y, x, y)
    CurveTo(f64, f64, f64, f64, f64, f64),
    ClosePath,
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::MoveTo(x, y) => write!(f, "M {} {}", x, y),
            PathElement::LineTo(x, y) => write!(f, "L {} {}", x, y),
            PathElement::CurveTo(x1, y1, x2, y2, x, y) => {
                write!(f, "C {} {} {} {} {} {}", x1, y1, x2, y2, x, y)
            }
            PathElement::ClosePath => write!(f, "Z"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    elements: Vec<PathElement>,
    current_point: Option<(f64, f64)>,
    subpath_start: Option<(f64, f64)>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new subpath at (x, y).
    pub fn move_to(&mut self, x: f64, y: f64) {
        // Consecutive moves collapse into the last one.
        if let Some(PathElement::MoveTo(..)) = self.elements.last() {
            self.elements.pop();
        }
        self.elements.push(PathElement::MoveTo(x, y));
        self.current_point = Some((x, y));
        self.subpath_start = Some((x, y));
    }

    /// Appends a line. Without a current point this acts as a move.
    pub fn line_to(&mut self, x: f64, y: f64) {
        if self.current_point.is_none() {
            self.move_to(x, y);
            return;
        }
        self.elements.push(PathElement::LineTo(x, y));
        self.current_point = Some((x, y));
    }

    pub fn curve_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x: f64, y: f64) {
        if self.current_point.is_none() {
            self.move_to(x1, y1);
        }
        self.elements.push(PathElement::CurveTo(x1, y1, x2, y2, x, y));
        self.current_point = Some((x, y));
    }

    /// Appends a closed rectangle as the `re` operator does.
    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.move_to(x, y);
        self.line_to(x + width, y);
        self.line_to(x + width, y + height);
        self.line_to(x, y + height);
        self.close_path();
    }

    /// Closes the current subpath; the current point returns to its start.
    pub fn close_path(&mut self) {
        match self.elements.last() {
            None | Some(PathElement::ClosePath) => {}
            Some(_) => {
                self.elements.push(PathElement::ClosePath);
                self.current_point = self.subpath_start;
            }
        }
    }

    pub fn current_point(&self) -> Option<(f64, f64)> {
        self.current_point
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.current_point = None;
        self.subpath_start = None;
    }

    /// Appends `other` with every point mapped through `matrix`.
    pub fn append_transformed(&mut self, other: &Path, matrix: &Matrix) {
        for element in &other.elements {
            match *element {
                PathElement::MoveTo(x, y) => {
                    let (x, y) = matrix.transform_point(x, y);
                    self.move_to(x, y);
                }
                PathElement::LineTo(x, y) => {
                    let (x, y) = matrix.transform_point(x, y);
                    self.line_to(x, y);
                }
                PathElement::CurveTo(x1, y1, x2, y2, x, y) => {
                    let (x1, y1) = matrix.transform_point(x1, y1);
                    let (x2, y2) = matrix.transform_point(x2, y2);
                    let (x, y) = matrix.transform_point(x, y);
                    self.curve_to(x1, y1, x2, y2, x, y);
                }
                PathElement::ClosePath => self.close_path(),
            }
        }
    }

    /// Control-point bounding box `(min_x, min_y, max_x, max_y)`.
    pub fn bounding_box(&self) -> Option<(f64, f64, f64, f64)> {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;
        let mut add = |x: f64, y: f64| {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        };
        for element in &self.elements {
            match *element {
                PathElement::MoveTo(x, y) | PathElement::LineTo(x, y) => add(x, y),
                PathElement::CurveTo(x1, y1, x2, y2, x, y) => {
                    add(x1, y1);
                    add(x2, y2);
                    add(x, y);
                }
                PathElement::ClosePath => {}
            }
        }
        bounds
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for element in &self.elements {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", element)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_path() {
        let path = Path::new();
        assert!(path.is_empty());
        assert_eq!(path.bounding_box(), None);
    }

    #[test]
    fn test_close_returns_to_start() {
        let mut path = Path::new();
        path.move_to(10.0, 20.0);
        path.line_to(30.0, 40.0);
        path.close_path();
        path.close_path();
        assert_eq!(path.current_point(), Some((10.0, 20.0)));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_rect() {
        let mut path = Path::new();
        path.rect(10.0, 20.0, 100.0, 50.0);
        assert_eq!(path.len(), 5);
        assert_eq!(path.bounding_box(), Some((10.0, 20.0, 110.0, 70.0)));
        assert_eq!(path.to_string(), "M 10 20 L 110 20 L 110 70 L 10 70 Z");
    }

    #[test]
    fn test_implicit_move_to() {
        let mut path = Path::new();
        path.line_to(30.0, 40.0);
        assert_eq!(path.elements(), &[PathElement::MoveTo(30.0, 40.0)]);
    }

    #[test]
    fn test_repeated_moves_collapse() {
        let mut path = Path::new();
        path.move_to(1.0, 1.0);
        path.move_to(2.0, 2.0);
        assert_eq!(path.elements(), &[PathElement::MoveTo(2.0, 2.0)]);
    }

    #[test]
    fn test_append_transformed() {
        let mut glyph = Path::new();
        glyph.move_to(0.0, 0.0);
        glyph.line_to(1.0, 1.0);

        let mut path = Path::new();
        path.append_transformed(&glyph, &Matrix::new(10.0, 0.0, 0.0, 10.0, 5.0, 5.0));
        assert_eq!(path.bounding_box(), Some((5.0, 5.0, 15.0, 15.0)));
    }
}
