//! Alpha handling for the re-encoder

use image::{Rgb, RgbImage, RgbaImage};

/// Alpha-weighted mean color of an image
///
/// Fully transparent pixels contribute nothing, so a uniform opaque
/// background with transparent holes averages to the background color.
/// Returns `None` when every pixel is fully transparent.
pub fn average_color(image: &RgbaImage) -> Option<[u8; 3]> {
    let mut sums = [0u64; 3];
    let mut weight = 0u64;

    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        let a = a as u64;
        sums[0] += r as u64 * a;
        sums[1] += g as u64 * a;
        sums[2] += b as u64 * a;
        weight += a;
    }

    if weight == 0 {
        return None;
    }

    let channel = |sum: u64| ((sum + weight / 2) / weight).min(255) as u8;
    Some([channel(sums[0]), channel(sums[1]), channel(sums[2])])
}

/// Composite `image` over a solid `background`, dropping the alpha channel
pub fn flatten(image: &RgbaImage, background: [u8; 3]) -> RgbImage {
    let mut canvas = RgbImage::new(image.width(), image.height());

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let a = a as u32;
        let blend = |fg: u8, bg: u8| ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8;
        canvas.put_pixel(
            x,
            y,
            Rgb([
                blend(r, background[0]),
                blend(g, background[1]),
                blend(b, background[2]),
            ]),
        );
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn framed(background: [u8; 3]) -> RgbaImage {
        // Opaque frame with a transparent, differently colored centre
        RgbaImage::from_fn(20, 20, |x, y| {
            if (5..15).contains(&x) && (5..15).contains(&y) {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([background[0], background[1], background[2], 255])
            }
        })
    }

    #[test]
    fn test_average_ignores_transparent_region() {
        let image = framed([200, 40, 90]);
        assert_eq!(average_color(&image), Some([200, 40, 90]));
    }

    #[test]
    fn test_average_of_mixed_opaque_pixels() {
        let image = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([100, 200, 50, 255])
            }
        });
        assert_eq!(average_color(&image), Some([50, 100, 25]));
    }

    #[test]
    fn test_average_of_fully_transparent_image() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 0]));
        assert_eq!(average_color(&image), None);
    }

    #[test]
    fn test_flatten_blends_alpha() {
        let image = RgbaImage::from_fn(3, 1, |x, _| match x {
            0 => Rgba([10, 20, 30, 255]),
            1 => Rgba([10, 20, 30, 0]),
            _ => Rgba([255, 255, 255, 128]),
        });

        let flat = flatten(&image, [0, 100, 200]);

        assert_eq!(flat.get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(flat.get_pixel(1, 0).0, [0, 100, 200]);
        let half = flat.get_pixel(2, 0).0;
        assert_eq!(half, [128, 178, 228]);
    }
}
