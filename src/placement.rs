/// Rectangle in PDF page space: origin at the bottom-left corner, y growing
/// upwards.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Converts a rectangle given from the top-left corner of the page, with
    /// the height growing downwards, as user interfaces usually do.
    pub fn from_top_left(x: f32, top: f32, width: f32, height: f32, page_height: f32) -> Self {
        Self {
            x,
            y: page_height - top - height,
            width,
            height,
        }
    }

    /// Builds a normalized rectangle from a PDF `[x1 y1 x2 y2]` array, whose
    /// corners may come in any order.
    pub fn from_corners([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    /// The `[x y x+w y+h]` form used by `/Rect` entries.
    pub fn to_corners(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }
}

/// Where the signature widget goes, and what to draw there.
#[derive(Debug, Clone, Default)]
pub struct VisualPlacement {
    /// Zero-based page index.
    pub page_index: usize,
    pub rect: Rect,
    /// Encoded PNG or JPEG image drawn over `rect`.
    pub image: Option<Vec<u8>>,
}

impl VisualPlacement {
    pub fn new(page_index: usize, rect: Rect) -> Self {
        Self {
            page_index,
            rect,
            image: None,
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }
}
