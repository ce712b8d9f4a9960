//! Render target that can be read back to CPU memory
//!
//! Used by headless runs and by tests that check composited pixels.

use log::debug;
use std::sync::mpsc;

use super::{RenderError, Result, Size};
use crate::gpu::DrawToken;

const BYTES_PER_PIXEL: u32 = 4;

/// An offscreen color target in the context's format.
pub struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Size,
}

impl OffscreenTarget {
    pub fn new(token: DrawToken<'_>, size: Size) -> Result<Self> {
        if size.is_empty() {
            return Err(RenderError::InitError(format!(
                "offscreen target needs a non-empty size, got {}",
                size
            )));
        }

        let texture = token.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Target"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: token.format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        debug!("Created offscreen target {}", size);

        Ok(Self {
            texture,
            view,
            size,
        })
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Copies the target into tightly packed RGBA rows.
    pub fn read_pixels(&self, token: DrawToken<'_>) -> Result<Vec<u8>> {
        let device = token.device();
        let (width, height) = (self.size.width, self.size.height);

        let unpadded_bytes_per_row = width * BYTES_PER_PIXEL;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = (unpadded_bytes_per_row + align - 1) / align * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Offscreen Readback Buffer"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Offscreen Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        token.queue().submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| RenderError::Readback("map callback never ran".to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            pixels.extend_from_slice(&data[start..start + unpadded_bytes_per_row as usize]);
        }
        drop(data);
        buffer.unmap();

        Ok(pixels)
    }
}

/// RGBA value at `x`, `y` of pixels returned by [`OffscreenTarget::read_pixels`].
pub fn pixel_at(pixels: &[u8], size: Size, x: u32, y: u32) -> Option<[u8; 4]> {
    if x >= size.width || y >= size.height {
        return None;
    }
    let offset = ((y * size.width + x) * BYTES_PER_PIXEL) as usize;
    let px = pixels.get(offset..offset + BYTES_PER_PIXEL as usize)?;
    Some([px[0], px[1], px[2], px[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_at_bounds() {
        let size = Size::new(2, 2);
        let pixels: Vec<u8> = (0..16).collect();
        assert_eq!(pixel_at(&pixels, size, 0, 0), Some([0, 1, 2, 3]));
        assert_eq!(pixel_at(&pixels, size, 1, 1), Some([12, 13, 14, 15]));
        assert_eq!(pixel_at(&pixels, size, 2, 0), None);
        assert_eq!(pixel_at(&pixels[..8], size, 0, 1), None);
    }
}
