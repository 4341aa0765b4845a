//! Page rendering: the content stream interpreter and the devices it draws
//! on.

pub mod color_space;
pub mod context;
pub mod device;
pub mod encoding;
pub mod font;
pub mod graphics_state;
pub mod image;
pub mod path;
pub mod raster_device;

pub use color_space::ColorSpace;
pub use context::RenderingContext;
pub use device::{Device, ImageData, Paint, TestDevice};
pub use font::PdfFont;
pub use graphics_state::{Color, FillRule, GraphicsState, LineCap, LineJoin, Matrix, StrokeProps};
pub use path::{Path, PathElement};
pub use raster_device::RasterDevice;
