//! Grid geometry and bitmap tiling.
//!
//! A multi-panel display is a `columns × rows` grid of identical tiles, each
//! tile backed by one physical panel.  The composite image must tile the
//! grid exactly: every pixel belongs to exactly one panel, with no gaps and
//! no overlaps.  Geometry is fixed at manager construction and validated
//! there — a bad grid is a configuration fault, never silently coerced.

use thiserror::Error;

/// Errors from geometry validation and bitmap slicing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    /// Grid columns/rows or tile dimensions are zero.
    #[error("grid geometry has a zero dimension: {columns}x{rows} grid of {tile_width}x{tile_height} tiles")]
    ZeroDimension {
        columns: u32,
        rows: u32,
        tile_width: u32,
        tile_height: u32,
    },

    /// Two panels claim the same grid cell.
    #[error("duplicate grid position ({column}, {row})")]
    DuplicatePosition { column: u32, row: u32 },

    /// A panel sits outside the configured grid.
    #[error("panel '{name}' at ({column}, {row}) is outside the {columns}x{rows} grid")]
    PlacementOutOfBounds {
        name: String,
        column: u32,
        row: u32,
        columns: u32,
        rows: u32,
    },

    /// The grid multiplies out past what a `u32` canvas can address.
    #[error("{columns}x{rows} grid of {tile_width}x{tile_height} tiles overflows the canvas dimensions")]
    CanvasOverflow {
        columns: u32,
        rows: u32,
        tile_width: u32,
        tile_height: u32,
    },

    /// The panel set does not cover every grid cell.
    #[error("panel set covers {actual} of {expected} grid cells; the composite image would have gaps")]
    IncompleteCoverage { expected: u32, actual: u32 },

    /// An image does not match the canvas the grid describes.
    #[error("image is {width}x{height}, the {columns}x{rows} grid needs exactly {expected_width}x{expected_height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        columns: u32,
        rows: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// A raw pixel buffer has the wrong byte length for its dimensions.
    #[error("pixel buffer holds {actual} bytes, {width}x{height} RGB needs {expected}")]
    BufferSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// A crop rectangle reaches outside the source bitmap.
    #[error("crop {width}x{height} at ({x}, {y}) exceeds the {src_width}x{src_height} source")]
    CropOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        src_width: u32,
        src_height: u32,
    },
}

/// The fixed grid a set of panels forms.
///
/// All panels in one grid share the same tile dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridGeometry {
    pub columns: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl GridGeometry {
    /// Validates that no dimension is zero and that the canvas and cell
    /// count fit in a `u32`.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.columns == 0 || self.rows == 0 || self.tile_width == 0 || self.tile_height == 0 {
            return Err(GeometryError::ZeroDimension {
                columns: self.columns,
                rows: self.rows,
                tile_width: self.tile_width,
                tile_height: self.tile_height,
            });
        }
        let overflows = self.columns.checked_mul(self.tile_width).is_none()
            || self.rows.checked_mul(self.tile_height).is_none()
            || self.columns.checked_mul(self.rows).is_none();
        if overflows {
            return Err(GeometryError::CanvasOverflow {
                columns: self.columns,
                rows: self.rows,
                tile_width: self.tile_width,
                tile_height: self.tile_height,
            });
        }
        Ok(())
    }

    /// Width of the composite canvas in pixels.  Saturates on a grid that
    /// [`GridGeometry::validate`] would reject.
    pub fn canvas_width(&self) -> u32 {
        self.columns.saturating_mul(self.tile_width)
    }

    /// Height of the composite canvas in pixels.  Saturates on a grid that
    /// [`GridGeometry::validate`] would reject.
    pub fn canvas_height(&self) -> u32 {
        self.rows.saturating_mul(self.tile_height)
    }

    /// Top-left pixel of the tile at the given grid position.
    pub fn tile_origin(&self, column: u32, row: u32) -> (u32, u32) {
        (
            column.saturating_mul(self.tile_width),
            row.saturating_mul(self.tile_height),
        )
    }

    /// Checks that `image` matches the canvas exactly.  Cropping only, never
    /// resampling: a mismatched image is rejected.
    pub fn check_canvas(&self, image: &Bitmap) -> Result<(), GeometryError> {
        if image.width() != self.canvas_width() || image.height() != self.canvas_height() {
            return Err(GeometryError::DimensionMismatch {
                width: image.width(),
                height: image.height(),
                columns: self.columns,
                rows: self.rows,
                expected_width: self.canvas_width(),
                expected_height: self.canvas_height(),
            });
        }
        Ok(())
    }
}

/// Where one physical panel sits in the grid.  Immutable after manager
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelPlacement {
    /// Unique human-readable panel name; keys the per-panel outcome maps.
    pub name: String,
    /// Link address of the panel.
    pub address: String,
    /// Grid column, 0-based from the left.
    pub column: u32,
    /// Grid row, 0-based from the top.
    pub row: u32,
}

/// Validates a panel set against a grid: in-bounds, no duplicate positions,
/// and full coverage (the composite image tiles exactly).
pub fn validate_placements(
    geometry: &GridGeometry,
    placements: &[PanelPlacement],
) -> Result<(), GeometryError> {
    geometry.validate()?;

    let mut seen = std::collections::HashSet::new();
    for placement in placements {
        if placement.column >= geometry.columns || placement.row >= geometry.rows {
            return Err(GeometryError::PlacementOutOfBounds {
                name: placement.name.clone(),
                column: placement.column,
                row: placement.row,
                columns: geometry.columns,
                rows: geometry.rows,
            });
        }
        if !seen.insert((placement.column, placement.row)) {
            return Err(GeometryError::DuplicatePosition {
                column: placement.column,
                row: placement.row,
            });
        }
    }

    let expected = geometry.columns * geometry.rows;
    if placements.len() as u32 != expected {
        return Err(GeometryError::IncompleteCoverage {
            expected,
            actual: placements.len() as u32,
        });
    }
    Ok(())
}

/// An owned RGB pixel buffer, row-major, three bytes per pixel.
///
/// This is the only image representation the transport layer ever sees; how
/// the pixels were produced (clock face, animation frame, static image) is
/// the renderer's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// Creates a black bitmap of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 3],
        }
    }

    /// Wraps an existing RGB buffer.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::BufferSizeMismatch`] if the byte length does
    /// not equal `width * height * 3`.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, GeometryError> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(GeometryError::BufferSizeMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The raw RGB bytes, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Consumes the bitmap, returning the raw RGB bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }

    /// Reads the pixel at `(x, y)`.  Panics on out-of-range coordinates,
    /// matching slice indexing semantics.
    pub fn rgb(&self, x: u32, y: u32) -> (u8, u8, u8) {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of range");
        let i = self.offset(x, y);
        (self.pixels[i], self.pixels[i + 1], self.pixels[i + 2])
    }

    /// Writes the pixel at `(x, y)`.
    pub fn set_rgb(&mut self, x: u32, y: u32, rgb: (u8, u8, u8)) {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of range");
        let i = self.offset(x, y);
        self.pixels[i] = rgb.0;
        self.pixels[i + 1] = rgb.1;
        self.pixels[i + 2] = rgb.2;
    }

    /// Extracts the exact rectangular sub-region at `(x, y)`.  No
    /// resampling: the crop is a pixel-for-pixel copy.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::CropOutOfBounds`] if the rectangle reaches
    /// outside this bitmap.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Bitmap, GeometryError> {
        if x.checked_add(width).map_or(true, |r| r > self.width)
            || y.checked_add(height).map_or(true, |b| b > self.height)
        {
            return Err(GeometryError::CropOutOfBounds {
                x,
                y,
                width,
                height,
                src_width: self.width,
                src_height: self.height,
            });
        }

        let mut out = Vec::with_capacity(width as usize * height as usize * 3);
        for row in y..y + height {
            let start = self.offset(x, row);
            let end = start + width as usize * 3;
            out.extend_from_slice(&self.pixels[start..end]);
        }
        Ok(Bitmap {
            width,
            height,
            pixels: out,
        })
    }

    /// Crops the tile for the given grid position.
    pub fn tile(
        &self,
        geometry: &GridGeometry,
        column: u32,
        row: u32,
    ) -> Result<Bitmap, GeometryError> {
        let (x, y) = geometry.tile_origin(column, row);
        self.crop(x, y, geometry.tile_width, geometry.tile_height)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(name: &str, column: u32, row: u32) -> PanelPlacement {
        PanelPlacement {
            name: name.to_string(),
            address: format!("AA:BB:CC:DD:EE:{:02X}", column * 16 + row),
            column,
            row,
        }
    }

    /// Fills a bitmap so every pixel encodes its own coordinates, which makes
    /// crop verification exact.
    fn coordinate_bitmap(width: u32, height: u32) -> Bitmap {
        let mut bmp = Bitmap::new(width, height);
        for y in 0..height {
            for x in 0..width {
                bmp.set_rgb(x, y, (x as u8, y as u8, 0x7F));
            }
        }
        bmp
    }

    #[test]
    fn test_canvas_dimensions() {
        let geom = GridGeometry {
            columns: 3,
            rows: 2,
            tile_width: 32,
            tile_height: 32,
        };
        assert_eq!(geom.canvas_width(), 96);
        assert_eq!(geom.canvas_height(), 64);
        assert_eq!(geom.tile_origin(2, 1), (64, 32));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let geom = GridGeometry {
            columns: 0,
            rows: 1,
            tile_width: 32,
            tile_height: 32,
        };
        assert!(matches!(
            geom.validate(),
            Err(GeometryError::ZeroDimension { .. })
        ));
    }

    #[test]
    fn test_overflowing_grid_rejected() {
        let geom = GridGeometry {
            columns: u32::MAX,
            rows: 2,
            tile_width: 3,
            tile_height: 1,
        };
        assert!(matches!(
            geom.validate(),
            Err(GeometryError::CanvasOverflow { .. })
        ));
        // Accessors stay panic-free even on a grid validate rejects.
        assert_eq!(geom.canvas_width(), u32::MAX);
        assert_eq!(geom.canvas_height(), 2);
    }

    #[test]
    fn test_two_by_one_grid_tiles_exactly() {
        // 2x1 grid of 32x32 tiles over a 64x32 image: left tile is columns
        // [0,32), right tile is columns [32,64), union is the whole image.
        let geom = GridGeometry {
            columns: 2,
            rows: 1,
            tile_width: 32,
            tile_height: 32,
        };
        let image = coordinate_bitmap(64, 32);

        let left = image.tile(&geom, 0, 0).unwrap();
        let right = image.tile(&geom, 1, 0).unwrap();

        assert_eq!(left.width(), 32);
        assert_eq!(right.width(), 32);
        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(left.rgb(x, y), image.rgb(x, y));
                assert_eq!(right.rgb(x, y), image.rgb(x + 32, y));
            }
        }
        // No overlap and full coverage: the two tiles account for every byte.
        assert_eq!(
            left.as_bytes().len() + right.as_bytes().len(),
            image.as_bytes().len()
        );
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let image = Bitmap::new(64, 32);
        assert!(matches!(
            image.crop(33, 0, 32, 32),
            Err(GeometryError::CropOutOfBounds { .. })
        ));
        assert!(matches!(
            image.crop(0, 1, 64, 32),
            Err(GeometryError::CropOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_validate_placements_accepts_full_grid() {
        let geom = GridGeometry {
            columns: 2,
            rows: 2,
            tile_width: 32,
            tile_height: 32,
        };
        let panels = vec![
            placement("nw", 0, 0),
            placement("ne", 1, 0),
            placement("sw", 0, 1),
            placement("se", 1, 1),
        ];
        assert!(validate_placements(&geom, &panels).is_ok());
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let geom = GridGeometry {
            columns: 2,
            rows: 1,
            tile_width: 32,
            tile_height: 32,
        };
        let panels = vec![placement("a", 0, 0), placement("b", 0, 0)];
        assert_eq!(
            validate_placements(&geom, &panels),
            Err(GeometryError::DuplicatePosition { column: 0, row: 0 })
        );
    }

    #[test]
    fn test_out_of_bounds_placement_rejected() {
        let geom = GridGeometry {
            columns: 2,
            rows: 1,
            tile_width: 32,
            tile_height: 32,
        };
        let panels = vec![placement("a", 0, 0), placement("b", 2, 0)];
        assert!(matches!(
            validate_placements(&geom, &panels),
            Err(GeometryError::PlacementOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_incomplete_coverage_rejected() {
        let geom = GridGeometry {
            columns: 2,
            rows: 2,
            tile_width: 32,
            tile_height: 32,
        };
        let panels = vec![placement("a", 0, 0), placement("b", 1, 0)];
        assert_eq!(
            validate_placements(&geom, &panels),
            Err(GeometryError::IncompleteCoverage {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_check_canvas_rejects_wrong_size() {
        let geom = GridGeometry {
            columns: 2,
            rows: 1,
            tile_width: 32,
            tile_height: 32,
        };
        let wrong = Bitmap::new(63, 32);
        assert!(matches!(
            geom.check_canvas(&wrong),
            Err(GeometryError::DimensionMismatch { .. })
        ));
        let right = Bitmap::new(64, 32);
        assert!(geom.check_canvas(&right).is_ok());
    }

    #[test]
    fn test_from_raw_validates_length() {
        assert!(Bitmap::from_raw(2, 2, vec![0; 12]).is_ok());
        assert!(matches!(
            Bitmap::from_raw(2, 2, vec![0; 11]),
            Err(GeometryError::BufferSizeMismatch { .. })
        ));
    }
}
