//! Local copy of the NXT screen buffer
//!
//! The LCD is 100x64 pixels stored as eight horizontal banks. Each byte is a
//! vertical strip of 8 pixels with the least significant bit on top.
//! Drawing happens locally; [`NxtSession::write_display`] pushes the result.
//!
//! [`NxtSession::write_display`]: super::NxtSession::write_display

use std::fmt;
use std::str::FromStr;

use protocol::nxt::{DISPLAY_BUFFER_SIZE, DISPLAY_HEIGHT, DISPLAY_WIDTH};

use super::font;

const WIDTH: i32 = DISPLAY_WIDTH as i32;
const HEIGHT: i32 = DISPLAY_HEIGHT as i32;

const BMP_HEADER_SIZE: u32 = 62;

/// Fill patterns for [`ScreenBuffer::pattern`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Checkerboard,
    StripesHorizontal,
    StripesVertical,
    Grid,
    Dots,
    Border,
    Smile,
}

impl Pattern {
    pub const ALL: [Pattern; 7] = [
        Pattern::Checkerboard,
        Pattern::StripesHorizontal,
        Pattern::StripesVertical,
        Pattern::Grid,
        Pattern::Dots,
        Pattern::Border,
        Pattern::Smile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pattern::Checkerboard => "checkerboard",
            Pattern::StripesHorizontal => "stripes-h",
            Pattern::StripesVertical => "stripes-v",
            Pattern::Grid => "grid",
            Pattern::Dots => "dots",
            Pattern::Border => "border",
            Pattern::Smile => "smile",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pattern::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Pattern::ALL.iter().map(|p| p.name()).collect();
                format!("unknown pattern '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenBuffer {
    bytes: Vec<u8>,
}

impl Default for ScreenBuffer {
    fn default() -> Self {
        Self {
            bytes: vec![0; DISPLAY_BUFFER_SIZE],
        }
    }
}

impl ScreenBuffer {
    /// Wrap raw buffer bytes; short input is zero padded, long input truncated
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::default();
        let len = bytes.len().min(DISPLAY_BUFFER_SIZE);
        buffer.bytes[..len].copy_from_slice(&bytes[..len]);
        buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    fn locate(x: i32, y: i32) -> Option<(usize, u8)> {
        if x < 0 || y < 0 || x >= DISPLAY_WIDTH as i32 || y >= DISPLAY_HEIGHT as i32 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        Some(((y / 8) * DISPLAY_WIDTH + x, 1 << (y % 8)))
    }

    /// Out-of-range coordinates are ignored
    pub fn set_pixel(&mut self, x: i32, y: i32, on: bool) {
        if let Some((index, mask)) = Self::locate(x, y) {
            if on {
                self.bytes[index] |= mask;
            } else {
                self.bytes[index] &= !mask;
            }
        }
    }

    pub fn pixel(&self, x: i32, y: i32) -> bool {
        Self::locate(x, y).is_some_and(|(index, mask)| self.bytes[index] & mask != 0)
    }

    /// Number of lit pixels
    pub fn lit(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }

    /// Bresenham line, both end points included
    pub fn line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) {
        let (dx, dy) = ((x2 - x1).abs(), (y2 - y1).abs());
        let sx = if x1 < x2 { 1 } else { -1 };
        let sy = if y1 < y2 { 1 } else { -1 };
        let (mut x, mut y) = (x1, y1);
        let mut err = dx - dy;

        loop {
            self.set_pixel(x, y, true);
            if x == x2 && y == y2 {
                break;
            }
            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                y += sy;
            }
        }
    }

    pub fn rect(&mut self, x: i32, y: i32, width: i32, height: i32, filled: bool) {
        if width <= 0 || height <= 0 {
            return;
        }
        if filled {
            for row in y..y + height {
                for col in x..x + width {
                    self.set_pixel(col, row, true);
                }
            }
            return;
        }
        for col in x..x + width {
            self.set_pixel(col, y, true);
            self.set_pixel(col, y + height - 1, true);
        }
        for row in y..y + height {
            self.set_pixel(x, row, true);
            self.set_pixel(x + width - 1, row, true);
        }
    }

    /// Midpoint circle; `filled` lights every pixel within `radius`
    pub fn circle(&mut self, cx: i32, cy: i32, radius: i32, filled: bool) {
        if radius < 0 {
            return;
        }
        if filled {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx * dx + dy * dy <= radius * radius {
                        self.set_pixel(cx + dx, cy + dy, true);
                    }
                }
            }
            return;
        }

        let (mut x, mut y, mut err) = (radius, 0, 0);
        while x >= y {
            for (px, py) in [
                (x, y),
                (y, x),
                (-y, x),
                (-x, y),
                (-x, -y),
                (-y, -x),
                (y, -x),
                (x, -y),
            ] {
                self.set_pixel(cx + px, cy + py, true);
            }
            if err <= 0 {
                y += 1;
                err += 2 * y + 1;
            }
            if err > 0 {
                x -= 1;
                err -= 2 * x + 1;
            }
        }
    }

    /// Draw `text` in the 5x7 font with its top-left corner at (x, y)
    pub fn text(&mut self, text: &str, x: i32, y: i32) {
        let mut cursor = x;
        for c in text.chars() {
            for (col, bits) in (0..).zip(font::glyph(c)) {
                for row in 0..font::GLYPH_HEIGHT {
                    if bits & (1 << row) != 0 {
                        self.set_pixel(cursor + col, y + row, true);
                    }
                }
            }
            cursor += font::ADVANCE;
        }
    }

    /// Clear the screen and draw `pattern`
    pub fn pattern(&mut self, pattern: Pattern) {
        self.clear();
        match pattern {
            Pattern::Checkerboard => {
                for y in 0..HEIGHT {
                    for x in (y % 2..WIDTH).step_by(2) {
                        self.set_pixel(x, y, true);
                    }
                }
            }
            Pattern::StripesHorizontal => {
                for y in (0..HEIGHT).step_by(4) {
                    self.rect(0, y, WIDTH, 2, true);
                }
            }
            Pattern::StripesVertical => {
                for x in (0..WIDTH).step_by(4) {
                    self.rect(x, 0, 2, HEIGHT, true);
                }
            }
            Pattern::Grid => {
                for y in (0..HEIGHT).step_by(8) {
                    self.line(0, y, WIDTH - 1, y);
                }
                for x in (0..WIDTH).step_by(8) {
                    self.line(x, 0, x, HEIGHT - 1);
                }
            }
            Pattern::Dots => {
                for y in (2..HEIGHT).step_by(8) {
                    for x in (2..WIDTH).step_by(8) {
                        self.rect(x, y, 2, 2, true);
                    }
                }
            }
            Pattern::Border => {
                self.rect(0, 0, WIDTH, HEIGHT, false);
                self.rect(2, 2, WIDTH - 4, HEIGHT - 4, false);
            }
            Pattern::Smile => {
                self.circle(50, 32, 25, false);
                self.circle(40, 26, 3, true);
                self.circle(60, 26, 3, true);
                for x in 35..=65 {
                    let d = x - 50;
                    let sag = f64::from(225 - d * d).sqrt() / 3.0;
                    self.set_pixel(x, 40 + sag as i32, true);
                }
            }
        }
    }

    /// Encode as a 1-bit BMP; lit pixels are black like on the LCD
    pub fn to_bmp(&self) -> Vec<u8> {
        let row_size = DISPLAY_WIDTH.div_ceil(32) * 4;
        let image_size = (row_size * DISPLAY_HEIGHT) as u32;
        let file_size = BMP_HEADER_SIZE + image_size;

        let mut bmp = Vec::with_capacity(file_size as usize);
        bmp.extend_from_slice(b"BM");
        bmp.extend_from_slice(&file_size.to_le_bytes());
        bmp.extend_from_slice(&[0; 4]);
        bmp.extend_from_slice(&BMP_HEADER_SIZE.to_le_bytes());

        bmp.extend_from_slice(&40u32.to_le_bytes());
        bmp.extend_from_slice(&(WIDTH).to_le_bytes());
        bmp.extend_from_slice(&(HEIGHT).to_le_bytes());
        bmp.extend_from_slice(&1u16.to_le_bytes()); // planes
        bmp.extend_from_slice(&1u16.to_le_bytes()); // bits per pixel
        bmp.extend_from_slice(&0u32.to_le_bytes()); // uncompressed
        bmp.extend_from_slice(&image_size.to_le_bytes());
        bmp.extend_from_slice(&[0; 8]);
        bmp.extend_from_slice(&2u32.to_le_bytes()); // palette entries
        bmp.extend_from_slice(&0u32.to_le_bytes());

        // BGRA palette: 0 white, 1 black
        bmp.extend_from_slice(&[0xff, 0xff, 0xff, 0x00]);
        bmp.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        for y in (0..HEIGHT).rev() {
            let mut row = vec![0u8; row_size];
            for x in 0..WIDTH {
                if self.pixel(x, y) {
                    row[(x / 8) as usize] |= 0x80 >> (x % 8);
                }
            }
            bmp.extend_from_slice(&row);
        }
        bmp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_addressing() {
        let mut screen = ScreenBuffer::default();
        screen.set_pixel(3, 9, true);
        // bank 1, column 3, bit 1
        assert_eq!(screen.as_bytes()[DISPLAY_WIDTH + 3], 0b10);
        assert!(screen.pixel(3, 9));
        assert!(!screen.pixel(3, 8));

        screen.set_pixel(3, 9, false);
        assert_eq!(screen.lit(), 0);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut screen = ScreenBuffer::default();
        screen.set_pixel(100, 0, true);
        screen.set_pixel(0, -1, true);
        assert_eq!(screen.lit(), 0);
        assert!(!screen.pixel(200, 200));
    }

    #[test]
    fn test_line_end_points_and_length() {
        let mut screen = ScreenBuffer::default();
        screen.line(0, 0, 9, 0);
        assert_eq!(screen.lit(), 10);

        screen.clear();
        screen.line(10, 10, 0, 0);
        assert_eq!(screen.lit(), 11);
        for i in 0..=10 {
            assert!(screen.pixel(i, i));
        }

        screen.clear();
        screen.line(5, 5, 5, 5);
        assert_eq!(screen.lit(), 1);
    }

    #[test]
    fn test_rect_outline_and_filled() {
        let mut screen = ScreenBuffer::default();
        screen.rect(10, 10, 6, 4, false);
        assert_eq!(screen.lit(), 2 * 6 + 2 * 4 - 4);
        assert!(!screen.pixel(12, 12));

        screen.clear();
        screen.rect(10, 10, 6, 4, true);
        assert_eq!(screen.lit(), 24);

        screen.clear();
        screen.rect(10, 10, 0, 4, true);
        assert_eq!(screen.lit(), 0);
    }

    #[test]
    fn test_circle() {
        let mut screen = ScreenBuffer::default();
        screen.circle(50, 32, 10, false);
        for (x, y) in [(60, 32), (40, 32), (50, 22), (50, 42)] {
            assert!(screen.pixel(x, y), "({}, {})", x, y);
        }
        assert!(!screen.pixel(50, 32));

        screen.clear();
        screen.circle(50, 32, 1, true);
        assert_eq!(screen.lit(), 5);
    }

    #[test]
    fn test_text_uses_font() {
        let mut screen = ScreenBuffer::default();
        screen.text("i", 0, 0);
        let expected: u32 = font::glyph('I').iter().map(|c| c.count_ones()).sum();
        assert_eq!(screen.lit(), expected);
        // middle column of 'I' is a full stroke
        assert!((0..7).all(|y| screen.pixel(2, y)));

        let mut spaced = ScreenBuffer::default();
        spaced.text("I I", 0, 0);
        assert_eq!(spaced.lit(), 2 * expected);
        assert!(spaced.pixel(2 + 2 * font::ADVANCE, 0));
    }

    #[test]
    fn test_patterns() {
        let mut screen = ScreenBuffer::default();
        screen.pattern(Pattern::Checkerboard);
        assert_eq!(screen.lit(), 3200);
        assert!(screen.pixel(0, 0) && !screen.pixel(1, 0) && screen.pixel(1, 1));

        screen.pattern(Pattern::StripesHorizontal);
        assert_eq!(screen.lit(), 100 * 32);

        screen.pattern(Pattern::Dots);
        assert_eq!(screen.lit(), 4 * 8 * 13);

        for pattern in Pattern::ALL {
            screen.pattern(pattern);
            assert!(screen.lit() > 0, "{}", pattern);
        }
    }

    #[test]
    fn test_pattern_names() {
        assert_eq!("stripes-v".parse::<Pattern>(), Ok(Pattern::StripesVertical));
        assert_eq!("SMILE".parse::<Pattern>(), Ok(Pattern::Smile));
        assert!("spiral".parse::<Pattern>().is_err());
    }

    #[test]
    fn test_bmp_layout() {
        let mut screen = ScreenBuffer::default();
        screen.set_pixel(0, 63, true);
        screen.set_pixel(9, 0, true);
        let bmp = screen.to_bmp();

        assert_eq!(&bmp[..2], b"BM");
        assert_eq!(bmp.len(), 62 + 16 * 64);
        assert_eq!(u32::from_le_bytes([bmp[2], bmp[3], bmp[4], bmp[5]]), bmp.len() as u32);
        assert_eq!(u32::from_le_bytes([bmp[10], bmp[11], bmp[12], bmp[13]]), 62);
        // rows are stored bottom-up
        assert_eq!(bmp[62], 0x80);
        assert_eq!(bmp[62 + 63 * 16 + 1], 0x40);
        assert_eq!(bmp[62..].iter().map(|b| b.count_ones()).sum::<u32>(), 2);
    }

    #[test]
    fn test_from_bytes_pads() {
        let screen = ScreenBuffer::from_bytes(&[0xff; 10]);
        assert_eq!(screen.as_bytes().len(), DISPLAY_BUFFER_SIZE);
        assert_eq!(screen.lit(), 80);
    }
}
