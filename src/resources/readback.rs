//! GPU to CPU readback helpers.
//!
//! Texture copies into buffers must use rows padded to
//! [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`]; the helpers here compute that
//! padding, strip it again after mapping and decode texels into the two
//! host-side pixel representations.

use half::f16;

use crate::errors::{Result, ShadeError};

/// Host-side pixels, row-major from the top-left corner, always RGBA-ordered
/// for four-channel formats.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    /// Eight-bit channels (unorm/srgb/uint formats).
    U8(Vec<u8>),
    /// Float channels (16-bit formats are widened).
    F32(Vec<f32>),
}

impl PixelData {
    /// Number of channel values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Self::U8(v) => Some(v),
            Self::F32(_) => None,
        }
    }

    #[must_use]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(v) => Some(v),
            Self::U8(_) => None,
        }
    }
}

/// Bytes per row rounded up to the copy alignment.
#[must_use]
pub fn padded_bytes_per_row(width: u32, bytes_per_texel: u32) -> u32 {
    let unpadded = width * bytes_per_texel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Removes the per-row padding of a mapped texture copy.
#[must_use]
pub fn strip_row_padding(data: &[u8], height: u32, unpadded: u32, padded: u32) -> Vec<u8> {
    if unpadded == padded {
        return data[..(unpadded * height) as usize].to_vec();
    }
    let mut out = Vec::with_capacity((unpadded * height) as usize);
    for row in data.chunks(padded as usize).take(height as usize) {
        out.extend_from_slice(&row[..unpadded as usize]);
    }
    out
}

/// Bytes per texel of the formats that can be read back.
#[must_use]
pub fn readable_texel_size(format: wgpu::TextureFormat) -> Option<u32> {
    use wgpu::TextureFormat as F;
    match format {
        F::R8Unorm | F::R8Uint => Some(1),
        F::Rg8Unorm | F::Rg8Uint | F::R16Float => Some(2),
        F::Rgba8Unorm
        | F::Rgba8UnormSrgb
        | F::Rgba8Uint
        | F::Bgra8Unorm
        | F::Bgra8UnormSrgb
        | F::Rg16Float
        | F::R32Float => Some(4),
        F::Rgba16Float | F::Rg32Float => Some(8),
        F::Rgba32Float => Some(16),
        _ => None,
    }
}

/// Decodes tightly packed rows of `format` texels.
pub fn decode_pixels(format: wgpu::TextureFormat, mut bytes: Vec<u8>) -> Result<PixelData> {
    use wgpu::TextureFormat as F;
    match format {
        F::R8Unorm | F::R8Uint | F::Rg8Unorm | F::Rg8Uint | F::Rgba8Unorm | F::Rgba8UnormSrgb | F::Rgba8Uint => {
            Ok(PixelData::U8(bytes))
        }
        F::Bgra8Unorm | F::Bgra8UnormSrgb => {
            for texel in bytes.chunks_exact_mut(4) {
                texel.swap(0, 2);
            }
            Ok(PixelData::U8(bytes))
        }
        F::R16Float | F::Rg16Float | F::Rgba16Float => {
            let halves: Vec<u16> = bytemuck::pod_collect_to_vec(&bytes);
            Ok(PixelData::F32(
                halves.into_iter().map(|h| f16::from_bits(h).to_f32()).collect(),
            ))
        }
        F::R32Float | F::Rg32Float | F::Rgba32Float => {
            Ok(PixelData::F32(bytemuck::pod_collect_to_vec(&bytes)))
        }
        other => Err(ShadeError::Readback(format!(
            "format {other:?} cannot be read back"
        ))),
    }
}

/// How [`map_read`] waits for the map callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MapWait {
    /// Poll the device without blocking and yield to the executor between
    /// checks.
    Yield,
    /// Block the calling thread until the queue drains. Native only; on the
    /// web this behaves like `Yield`.
    Block,
}

/// Maps `buffer` for reading and copies out its full contents.
pub(crate) async fn map_read(device: &wgpu::Device, buffer: &wgpu::Buffer, wait: MapWait) -> Result<Vec<u8>> {
    let slice = buffer.slice(..);
    let (tx, rx) = flume::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    #[cfg(not(target_arch = "wasm32"))]
    {
        if wait == MapWait::Block {
            device
                .poll(wgpu::PollType::wait_indefinitely())
                .map_err(|e| ShadeError::Readback(e.to_string()))?;
        }
        poll_until_mapped(device, &rx).await?;
    }
    #[cfg(target_arch = "wasm32")]
    {
        let _ = (device, wait);
        rx.recv_async()
            .await
            .map_err(|_| ShadeError::Readback("map callback dropped".to_owned()))??;
    }

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(data)
}

/// Drives the device with non-blocking polls until the map callback fires.
#[cfg(not(target_arch = "wasm32"))]
async fn poll_until_mapped(
    device: &wgpu::Device,
    rx: &flume::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
) -> Result<()> {
    std::future::poll_fn(|cx| {
        if let Err(e) = device.poll(wgpu::PollType::Poll) {
            return std::task::Poll::Ready(Err(ShadeError::Readback(e.to_string())));
        }
        match rx.try_recv() {
            Ok(mapped) => std::task::Poll::Ready(mapped.map_err(ShadeError::from)),
            Err(flume::TryRecvError::Empty) => {
                cx.waker().wake_by_ref();
                std::task::Poll::Pending
            }
            Err(flume::TryRecvError::Disconnected) => {
                std::task::Poll::Ready(Err(ShadeError::Readback("map callback dropped".to_owned())))
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64, 4), 256);
        assert_eq!(padded_bytes_per_row(65, 4), 512);
        assert_eq!(padded_bytes_per_row(8, 16), 256);
    }

    #[test]
    fn strip_padding_keeps_leading_bytes_of_each_row() {
        let padded = padded_bytes_per_row(2, 4);
        let mut data = vec![0u8; (padded * 2) as usize];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[padded as usize..padded as usize + 8].copy_from_slice(&[9; 8]);
        let rows = strip_row_padding(&data, 2, 8, padded);
        assert_eq!(rows.len(), 16);
        assert_eq!(&rows[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&rows[8..], &[9; 8]);
    }

    #[test]
    fn bgra_is_swizzled_to_rgba() {
        let pixels = decode_pixels(wgpu::TextureFormat::Bgra8Unorm, vec![0, 0, 255, 255]).unwrap();
        assert_eq!(pixels.as_u8(), Some(&[255, 0, 0, 255][..]));
    }

    #[test]
    fn half_floats_are_widened() {
        let bytes: Vec<u8> = [1.5f32, -2.0, 0.0, 1.0]
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_bits().to_ne_bytes())
            .collect();
        let pixels = decode_pixels(wgpu::TextureFormat::Rgba16Float, bytes).unwrap();
        assert_eq!(pixels.as_f32(), Some(&[1.5, -2.0, 0.0, 1.0][..]));
    }

    #[test]
    fn integer_formats_without_decoder_are_rejected() {
        assert!(decode_pixels(wgpu::TextureFormat::R32Uint, vec![0; 4]).is_err());
    }
}
