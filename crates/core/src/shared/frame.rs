use std::time::Duration;

use ndarray::ArrayView3;

use super::geometry::Size;

/// One decoded video frame: contiguous RGB bytes in row-major order.
///
/// Frames are handed around as `Arc<Frame>` so the player and the detector
/// share one buffer. A frame is never mutated after decode; "the current
/// frame" changes by swapping the `Arc`, not by writing into it.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
    timestamp: Duration,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            timestamp: Duration::ZERO,
        }
    }

    /// Attaches the presentation time of this frame within its stream.
    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(
            (
                self.height as usize,
                self.width as usize,
                self.channels as usize,
            ),
            &self.data,
        )
        .expect("Frame data length must match dimensions")
    }

    /// Expands RGB to opaque RGBA for display surfaces.
    pub fn to_rgba(&self) -> Vec<u8> {
        match self.channels {
            4 => self.data.clone(),
            3 => {
                let mut out = Vec::with_capacity(self.data.len() / 3 * 4);
                for px in self.data.chunks_exact(3) {
                    out.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                out
            }
            _ => {
                let mut out = Vec::with_capacity(self.data.len() * 4);
                for &v in &self.data {
                    out.extend_from_slice(&[v, v, v, 255]);
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12]; // 2x2x3
        let frame = Frame::new(data.clone(), 2, 2, 3, 5);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.size(), Size::new(2, 2));
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.timestamp(), Duration::ZERO);
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    fn test_with_timestamp() {
        let frame = Frame::new(vec![0u8; 3], 1, 1, 3, 0).with_timestamp(Duration::from_millis(40));
        assert_eq!(frame.timestamp(), Duration::from_millis(40));
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        Frame::new(vec![0u8; 10], 2, 2, 3, 0);
    }

    #[test]
    fn test_as_ndarray_pixel_access() {
        // 2x2 RGB: pixel (row=1, col=0) is red
        let mut data = vec![0u8; 12];
        data[6] = 255;
        let frame = Frame::new(data, 2, 2, 3, 0);
        let arr = frame.as_ndarray();
        assert_eq!(arr.shape(), &[2, 2, 3]);
        assert_eq!(arr[[1, 0, 0]], 255);
        assert_eq!(arr[[1, 0, 1]], 0);
    }

    #[test]
    fn test_to_rgba_adds_opaque_alpha() {
        let frame = Frame::new(vec![10, 20, 30, 40, 50, 60], 2, 1, 3, 0);
        assert_eq!(frame.to_rgba(), vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn test_to_rgba_expands_gray() {
        let frame = Frame::new(vec![7, 9], 2, 1, 1, 0);
        assert_eq!(frame.to_rgba(), vec![7, 7, 7, 255, 9, 9, 9, 255]);
    }
}
