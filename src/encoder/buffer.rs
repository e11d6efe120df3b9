//! Reusable frame buffers
//!
//! A `HardwareBuffer` is allocated once from the first sampled image and then
//! overwritten in place for every later frame. Images produced by a stream
//! implement `NativeImage`, which knows how to fill such a buffer.

use crate::capture::traits::Resolution;
use crate::utils::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};

/// Pixel format of a buffer or image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling
    Yuv420,
    /// Packed 8-bit RGB
    Rgb24,
}

impl ColorFormat {
    /// Bytes needed for one frame at the given resolution
    pub fn frame_len(&self, resolution: Resolution) -> usize {
        match self {
            ColorFormat::Yuv420 => {
                let (cw, ch) = resolution.chroma();
                resolution.pixels() + 2 * cw * ch
            }
            ColorFormat::Rgb24 => resolution.pixels() * 3,
        }
    }
}

/// Memory layout requested for a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BufferLayout {
    Pitch,
    BlockLinear,
}

/// Frame memory handed from the capture side to the encoder
#[derive(Debug)]
pub struct HardwareBuffer {
    resolution: Resolution,
    format: ColorFormat,
    layout: BufferLayout,
    data: Vec<u8>,
}

impl HardwareBuffer {
    /// Allocate a zeroed buffer
    pub fn allocate(resolution: Resolution, format: ColorFormat, layout: BufferLayout) -> Self {
        Self {
            resolution,
            format,
            layout,
            data: vec![0; format.frame_len(resolution)],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// An image that can populate a `HardwareBuffer`
pub trait NativeImage: Send {
    fn resolution(&self) -> Resolution;

    /// Allocate a new buffer holding this image
    fn create_buffer(
        &self,
        resolution: Resolution,
        format: ColorFormat,
        layout: BufferLayout,
    ) -> CaptureResult<HardwareBuffer>;

    /// Overwrite an existing buffer with this image
    fn copy_to_buffer(&self, buffer: &mut HardwareBuffer) -> CaptureResult<()>;
}

/// CPU-side image in one of the supported formats
#[derive(Debug, Clone)]
pub struct PlanarImage {
    resolution: Resolution,
    format: ColorFormat,
    data: Vec<u8>,
}

impl PlanarImage {
    pub fn new(resolution: Resolution, format: ColorFormat, data: Vec<u8>) -> CaptureResult<Self> {
        let expected = format.frame_len(resolution);
        if data.len() != expected {
            return Err(CaptureError::resource(
                "image",
                format!(
                    "{:?} {} needs {} bytes, got {}",
                    format,
                    resolution,
                    expected,
                    data.len()
                ),
            ));
        }
        Ok(Self {
            resolution,
            format,
            data,
        })
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl NativeImage for PlanarImage {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn create_buffer(
        &self,
        resolution: Resolution,
        format: ColorFormat,
        layout: BufferLayout,
    ) -> CaptureResult<HardwareBuffer> {
        let mut buffer = HardwareBuffer::allocate(resolution, format, layout);
        self.copy_to_buffer(&mut buffer)?;
        Ok(buffer)
    }

    fn copy_to_buffer(&self, buffer: &mut HardwareBuffer) -> CaptureResult<()> {
        if buffer.resolution != self.resolution {
            return Err(CaptureError::resource(
                "buffer copy",
                format!(
                    "image is {} but buffer is {}",
                    self.resolution, buffer.resolution
                ),
            ));
        }

        match (self.format, buffer.format) {
            (ColorFormat::Yuv420, ColorFormat::Yuv420) | (ColorFormat::Rgb24, ColorFormat::Rgb24) => {
                buffer.data.copy_from_slice(&self.data)
            }
            (ColorFormat::Rgb24, ColorFormat::Yuv420) => {
                rgb_to_yuv420(&self.data, self.resolution, &mut buffer.data)
            }
            (ColorFormat::Yuv420, ColorFormat::Rgb24) => {
                yuv420_to_rgb(&self.data, self.resolution, &mut buffer.data)
            }
        }
        Ok(())
    }
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Convert planar YUV 4:2:0 (full-range BT.601) to packed RGB
pub fn yuv420_to_rgb(src: &[u8], resolution: Resolution, dst: &mut [u8]) {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let (cw, ch) = resolution.chroma();
    let (y_plane, chroma) = src.split_at(width * height);
    let (u_plane, v_plane) = chroma.split_at(cw * ch);

    for row in 0..height {
        for col in 0..width {
            let y = y_plane[row * width + col] as f32;
            let chroma_index = (row / 2) * cw + col / 2;
            let u = u_plane[chroma_index] as f32 - 128.0;
            let v = v_plane[chroma_index] as f32 - 128.0;

            let out = (row * width + col) * 3;
            dst[out] = clamp_u8(y + 1.402 * v);
            dst[out + 1] = clamp_u8(y - 0.344_136 * u - 0.714_136 * v);
            dst[out + 2] = clamp_u8(y + 1.772 * u);
        }
    }
}

/// Convert packed RGB to planar YUV 4:2:0, sampling chroma from the top-left
/// pixel of each 2x2 block
pub fn rgb_to_yuv420(src: &[u8], resolution: Resolution, dst: &mut [u8]) {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let (cw, ch) = resolution.chroma();
    let (y_plane, chroma) = dst.split_at_mut(width * height);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

    for row in 0..height {
        for col in 0..width {
            let px = (row * width + col) * 3;
            let r = src[px] as f32;
            let g = src[px + 1] as f32;
            let b = src[px + 2] as f32;

            y_plane[row * width + col] = clamp_u8(0.299 * r + 0.587 * g + 0.114 * b);

            if row % 2 == 0 && col % 2 == 0 {
                let chroma_index = (row / 2) * cw + col / 2;
                u_plane[chroma_index] = clamp_u8(-0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0);
                v_plane[chroma_index] = clamp_u8(0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0);
            }
        }
    }
}
