//! Class palette codec
//!
//! Bidirectional, lossless mapping between RGB label imagery and class-index
//! masks, derived from parallel `titles`/`colors` lists. The color→index
//! lookup is built once at construction so decoding stays O(1) per pixel
//! over the millions of pixels a label pyramid contains.
//!
//! Decoding never guesses: a pixel whose color is not in the palette fails
//! the whole decode with [`PaletteError::UnknownColor`]. Mislabeled training
//! pixels are worse than a hard stop.

pub mod named;

use image::{Rgb, RgbImage};
use std::collections::HashMap;
use thiserror::Error;

/// Per-pixel class-index mask decoded from a label tile.
///
/// Indices are in `[0, classes)` where `classes` is the palette length.
/// Stored row-major, one `u8` per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMask {
    /// Mask height in pixels
    pub height: u32,
    /// Mask width in pixels
    pub width: u32,
    /// Row-major class indices, `height * width` entries
    pub data: Vec<u8>,
}

impl ClassMask {
    /// Creates a mask, validating that the buffer matches the dimensions.
    pub fn new(height: u32, width: u32, data: Vec<u8>) -> Result<Self, PaletteError> {
        let expected = height as usize * width as usize;
        if data.len() != expected {
            return Err(PaletteError::MaskSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    /// Returns the class index at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `x` or `y` is out of bounds.
    pub fn get(&self, x: u32, y: u32) -> u8 {
        assert!(x < self.width && y < self.height);
        self.data[y as usize * self.width as usize + x as usize]
    }
}

/// Errors raised by palette construction and the codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaletteError {
    /// titles and colors lists have different lengths
    #[error("Class configuration mismatch: {titles} titles but {colors} colors")]
    ClassMismatch { titles: usize, colors: usize },

    /// Palette must define at least one class
    #[error("Palette must define at least one class")]
    EmptyPalette,

    /// Class indices are stored as u8, bounding the palette at 256 entries
    #[error("Palette defines {0} classes, more than the 256 supported")]
    TooManyClasses(usize),

    /// Two classes share the same color, making decode ambiguous
    #[error("Duplicate palette color ({}, {}, {})", .0[0], .0[1], .0[2])]
    DuplicateColor([u8; 3]),

    /// Mask pixel carries an index outside the palette
    #[error("Invalid class index {index} at ({x}, {y}): palette has {classes} classes")]
    InvalidClassIndex {
        index: u8,
        classes: usize,
        x: u32,
        y: u32,
    },

    /// Label pixel color is not present in the palette
    #[error("Unknown color ({}, {}, {}) at ({x}, {y})", .color[0], .color[1], .color[2])]
    UnknownColor { color: [u8; 3], x: u32, y: u32 },

    /// Mask buffer length does not match its stated dimensions
    #[error("Mask buffer holds {actual} pixels, dimensions require {expected}")]
    MaskSizeMismatch { expected: usize, actual: usize },
}

/// Ordered correspondence between class titles and label colors.
///
/// Index 0 is the background/first class by list-order convention. The
/// palette operates only on resolved RGB triples; name resolution lives in
/// [`named`].
#[derive(Debug, Clone)]
pub struct ClassPalette {
    titles: Vec<String>,
    colors: Vec<Rgb<u8>>,
    /// Prebuilt reverse map for O(1) per-pixel decoding
    index_of: HashMap<[u8; 3], u8>,
}

impl ClassPalette {
    /// Builds a palette from parallel title/color lists.
    ///
    /// # Errors
    ///
    /// Fails if the lists differ in length, are empty, exceed 256 classes,
    /// or contain a repeated color.
    pub fn new(titles: Vec<String>, colors: Vec<Rgb<u8>>) -> Result<Self, PaletteError> {
        if titles.len() != colors.len() {
            return Err(PaletteError::ClassMismatch {
                titles: titles.len(),
                colors: colors.len(),
            });
        }
        if titles.is_empty() {
            return Err(PaletteError::EmptyPalette);
        }
        if titles.len() > 256 {
            return Err(PaletteError::TooManyClasses(titles.len()));
        }

        let mut index_of = HashMap::with_capacity(colors.len());
        for (index, color) in colors.iter().enumerate() {
            if index_of.insert(color.0, index as u8).is_some() {
                return Err(PaletteError::DuplicateColor(color.0));
            }
        }

        Ok(Self {
            titles,
            colors,
            index_of,
        })
    }

    /// Number of classes in the palette.
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    /// True when the palette is empty. Construction forbids this, so the
    /// method exists only to satisfy the `len`/`is_empty` pairing lint.
    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    /// Class titles in index order.
    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    /// Class colors in index order.
    pub fn colors(&self) -> &[Rgb<u8>] {
        &self.colors
    }

    /// Encodes a class mask into an RGB label image.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClassIndex` for the first pixel whose index is
    /// outside `[0, len())`.
    pub fn encode(&self, mask: &ClassMask) -> Result<RgbImage, PaletteError> {
        let mut image = RgbImage::new(mask.width, mask.height);

        for (i, &index) in mask.data.iter().enumerate() {
            let x = (i % mask.width as usize) as u32;
            let y = (i / mask.width as usize) as u32;

            let color = self.colors.get(index as usize).copied().ok_or(
                PaletteError::InvalidClassIndex {
                    index,
                    classes: self.len(),
                    x,
                    y,
                },
            )?;
            image.put_pixel(x, y, color);
        }

        Ok(image)
    }

    /// Decodes an RGB label image into a class mask.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColor` for the first pixel whose color has no
    /// palette entry. Nearest-color matching is deliberately not offered.
    pub fn decode(&self, image: &RgbImage) -> Result<ClassMask, PaletteError> {
        let mut data = Vec::with_capacity(image.width() as usize * image.height() as usize);

        for (x, y, pixel) in image.enumerate_pixels() {
            let index = self
                .index_of
                .get(&pixel.0)
                .copied()
                .ok_or(PaletteError::UnknownColor {
                    color: pixel.0,
                    x,
                    y,
                })?;
            data.push(index);
        }

        ClassMask::new(image.height(), image.width(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn building_palette() -> ClassPalette {
        ClassPalette::new(
            vec!["background".to_string(), "building".to_string()],
            vec![
                named::resolve("white").unwrap(),
                named::resolve("deeppink").unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_palette_rejects_length_mismatch() {
        let result = ClassPalette::new(
            vec!["background".to_string()],
            vec![Rgb([0, 0, 0]), Rgb([255, 255, 255])],
        );
        assert_eq!(
            result.unwrap_err(),
            PaletteError::ClassMismatch {
                titles: 1,
                colors: 2
            }
        );
    }

    #[test]
    fn test_palette_rejects_empty() {
        let result = ClassPalette::new(vec![], vec![]);
        assert_eq!(result.unwrap_err(), PaletteError::EmptyPalette);
    }

    #[test]
    fn test_palette_rejects_duplicate_colors() {
        let result = ClassPalette::new(
            vec!["a".to_string(), "b".to_string()],
            vec![Rgb([1, 2, 3]), Rgb([1, 2, 3])],
        );
        assert_eq!(result.unwrap_err(), PaletteError::DuplicateColor([1, 2, 3]));
    }

    #[test]
    fn test_decode_two_by_two_label_tile() {
        // [white, deeppink, deeppink, white] -> [0, 1, 1, 0]
        let palette = building_palette();
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, Rgb([255, 255, 255]));
        image.put_pixel(1, 0, Rgb([255, 20, 147]));
        image.put_pixel(0, 1, Rgb([255, 20, 147]));
        image.put_pixel(1, 1, Rgb([255, 255, 255]));

        let mask = palette.decode(&image).unwrap();
        assert_eq!(mask.data, vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_encode_reproduces_label_pixels() {
        let palette = building_palette();
        let mask = ClassMask::new(2, 2, vec![0, 1, 1, 0]).unwrap();

        let image = palette.encode(&mask).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([255, 20, 147]));
        assert_eq!(image.get_pixel(0, 1), &Rgb([255, 20, 147]));
        assert_eq!(image.get_pixel(1, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_roundtrip_law() {
        let palette = ClassPalette::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![Rgb([0, 0, 0]), Rgb([10, 20, 30]), Rgb([200, 100, 50])],
        )
        .unwrap();

        let mask = ClassMask::new(3, 4, vec![0, 1, 2, 2, 1, 0, 0, 0, 1, 2, 1, 0]).unwrap();
        let decoded = palette.decode(&palette.encode(&mask).unwrap()).unwrap();
        assert_eq!(decoded, mask);
    }

    #[test]
    fn test_encode_rejects_out_of_range_index() {
        let palette = building_palette();
        let mask = ClassMask::new(1, 2, vec![0, 2]).unwrap();

        let err = palette.encode(&mask).unwrap_err();
        assert_eq!(
            err,
            PaletteError::InvalidClassIndex {
                index: 2,
                classes: 2,
                x: 1,
                y: 0
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_color() {
        let palette = building_palette();
        let mut image = RgbImage::new(1, 1);
        image.put_pixel(0, 0, Rgb([12, 34, 56]));

        let err = palette.decode(&image).unwrap_err();
        assert_eq!(
            err,
            PaletteError::UnknownColor {
                color: [12, 34, 56],
                x: 0,
                y: 0
            }
        );
    }

    #[test]
    fn test_mask_size_validation() {
        let result = ClassMask::new(2, 2, vec![0, 1, 0]);
        assert_eq!(
            result.unwrap_err(),
            PaletteError::MaskSizeMismatch {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_mask_get_row_major() {
        let mask = ClassMask::new(2, 3, vec![0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(mask.get(0, 0), 0);
        assert_eq!(mask.get(2, 0), 2);
        assert_eq!(mask.get(0, 1), 3);
        assert_eq!(mask.get(2, 1), 5);
    }
}
