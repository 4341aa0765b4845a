use super::parser::{Dict, PDFObject, Ref};

/// US Letter, used when a page carries no usable box.
pub const DEFAULT_MEDIA_BOX: Rect = Rect {
    x0: 0.0,
    y0: 0.0,
    x1: 612.0,
    y1: 792.0,
};

/// Axis-aligned rectangle in default user space, normalised so that
/// `x0 <= x1` and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Rect {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Reads a `[llx lly urx ury]` array. Arrays that are short, non-numeric
    /// or have zero area are rejected.
    pub fn from_object(obj: &PDFObject) -> Option<Rect> {
        let values = obj.as_number_array()?;
        if values.len() < 4 || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let rect = Rect::new(values[0], values[1], values[2], values[3]);
        (rect.width() > 0.0 && rect.height() > 0.0).then_some(rect)
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// Overlap of two rectangles, `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        };
        (rect.width() > 0.0 && rect.height() > 0.0).then_some(rect)
    }
}

/// Attributes a page may inherit from its ancestors in the page tree.
///
/// Values are stored already resolved (no top-level references).
#[derive(Debug, Clone, Default)]
pub struct InheritedAttributes {
    pub resources: Option<PDFObject>,
    pub media_box: Option<PDFObject>,
    pub crop_box: Option<PDFObject>,
    pub rotate: Option<PDFObject>,
}

impl InheritedAttributes {
    pub const KEYS: [&'static str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

    pub fn get(&self, key: &str) -> Option<&PDFObject> {
        match key {
            "Resources" => self.resources.as_ref(),
            "MediaBox" => self.media_box.as_ref(),
            "CropBox" => self.crop_box.as_ref(),
            "Rotate" => self.rotate.as_ref(),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: PDFObject) {
        match key {
            "Resources" => self.resources = Some(value),
            "MediaBox" => self.media_box = Some(value),
            "CropBox" => self.crop_box = Some(value),
            "Rotate" => self.rotate = Some(value),
            _ => {}
        }
    }
}

/// Normalises a `/Rotate` value to 0, 90, 180 or 270. Values that are not
/// multiples of 90 are rounded down to one.
pub fn normalize_rotation(degrees: i64) -> u16 {
    (degrees.rem_euclid(360) / 90 * 90) as u16
}

/// A single page in a PDF document.
///
/// A page dictionary contains properties like:
/// - MediaBox: the boundaries of the physical medium
/// - CropBox: the visible region, clipped to the media box
/// - Resources: fonts, images, and other resources used by the page
/// - Contents: the content stream(s) that draw the page
///
/// Inheritable attributes are resolved once when the page list is built.
#[derive(Debug, Clone)]
pub struct Page {
    index: usize,

    dict: Dict,

    reference: Option<Ref>,

    resources: Option<Dict>,

    media_box: Rect,

    /// Crop box intersected with the media box
    crop_box: Rect,

    rotation: u16,

    user_unit: f64,
}

impl Page {
    /// Creates a page from its dictionary and its effective inherited
    /// attributes.
    pub fn new(index: usize, dict: Dict, reference: Option<Ref>, attributes: InheritedAttributes) -> Self {
        let media_box = attributes
            .media_box
            .as_ref()
            .and_then(Rect::from_object)
            .unwrap_or(DEFAULT_MEDIA_BOX);
        let crop_box = attributes
            .crop_box
            .as_ref()
            .and_then(Rect::from_object)
            .and_then(|crop| crop.intersect(&media_box))
            .unwrap_or(media_box);
        let rotation = attributes
            .rotate
            .as_ref()
            .and_then(PDFObject::as_number)
            .map_or(0, |r| normalize_rotation(r as i64));
        let user_unit = dict
            .get("UserUnit")
            .and_then(PDFObject::as_number)
            .filter(|u| u.is_finite() && *u > 0.0)
            .unwrap_or(1.0);
        let resources = match attributes.resources {
            Some(PDFObject::Dictionary(dict)) => Some(dict),
            _ => None,
        };

        Page {
            index,
            dict,
            reference,
            resources,
            media_box,
            crop_box,
            rotation,
            user_unit,
        }
    }

    /// Returns the page index (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dict(&self) -> &Dict {
        &self.dict
    }

    /// Returns the page's indirect object reference if it has one.
    pub fn reference(&self) -> Option<Ref> {
        self.reference
    }

    pub fn get(&self, key: &str) -> Option<&PDFObject> {
        self.dict.get(key)
    }

    pub fn resources(&self) -> Option<&Dict> {
        self.resources.as_ref()
    }

    /// Gets the Contents for this page.
    ///
    /// Contents can be either a single stream or an array of streams.
    pub fn contents(&self) -> Option<&PDFObject> {
        self.dict.get("Contents")
    }

    pub fn media_box(&self) -> Rect {
        self.media_box
    }

    /// The visible region of the page.
    pub fn view_box(&self) -> Rect {
        self.crop_box
    }

    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub fn rotation(&self) -> u16 {
        self.rotation
    }

    pub fn user_unit(&self) -> f64 {
        self.user_unit
    }

    /// Displayed size in page units: the view box scaled by `/UserUnit`,
    /// with width and height swapped for quarter-turn rotations.
    pub fn size(&self) -> (f64, f64) {
        let width = self.crop_box.width() * self.user_unit;
        let height = self.crop_box.height() * self.user_unit;
        if self.rotation % 180 == 90 {
            (height, width)
        } else {
            (width, height)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(values: &[f64]) -> PDFObject {
        PDFObject::Array(values.iter().map(|v| PDFObject::Number(*v)).collect())
    }

    #[test]
    fn test_rect_normalises_corners() {
        let rect = Rect::from_object(&numbers(&[100.0, 200.0, 0.0, 0.0])).unwrap();
        assert_eq!(rect, Rect::new(0.0, 0.0, 100.0, 200.0));
        assert_eq!(rect.width(), 100.0);
    }

    #[test]
    fn test_degenerate_rect_rejected() {
        assert!(Rect::from_object(&numbers(&[0.0, 0.0, 0.0, 100.0])).is_none());
        assert!(Rect::from_object(&numbers(&[0.0, 0.0, 10.0])).is_none());
        assert!(Rect::from_object(&PDFObject::Name("A4".into())).is_none());
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0), 0);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(100), 90);
    }

    #[test]
    fn test_default_size_without_boxes() {
        let page = Page::new(0, Dict::default(), None, InheritedAttributes::default());
        assert_eq!(page.size(), (612.0, 792.0));
        assert_eq!(page.rotation(), 0);
    }

    #[test]
    fn test_rotation_swaps_size() {
        let attributes = InheritedAttributes {
            media_box: Some(numbers(&[0.0, 0.0, 200.0, 100.0])),
            rotate: Some(PDFObject::Number(90.0)),
            ..Default::default()
        };
        let page = Page::new(0, Dict::default(), None, attributes);
        assert_eq!(page.size(), (100.0, 200.0));
    }

    #[test]
    fn test_crop_box_clipped_and_user_unit() {
        let attributes = InheritedAttributes {
            media_box: Some(numbers(&[0.0, 0.0, 100.0, 100.0])),
            crop_box: Some(numbers(&[50.0, 50.0, 300.0, 300.0])),
            ..Default::default()
        };
        let mut dict = Dict::default();
        dict.insert("UserUnit".to_string(), PDFObject::Number(2.0));
        let page = Page::new(0, dict, None, attributes);

        assert_eq!(page.view_box(), Rect::new(50.0, 50.0, 100.0, 100.0));
        assert_eq!(page.size(), (100.0, 100.0));
    }
}
