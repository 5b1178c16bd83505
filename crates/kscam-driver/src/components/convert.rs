//! Pixel conversion from raw device frames to the output buffer layout.

use kscam_core::{CameraError, CameraResult};

/// Expand packed 3-byte color pixels to 4-byte pixels.
///
/// The three source channels are copied in order and the fourth byte of every
/// output pixel is zero. Exactly `width * height` pixels are processed; a
/// source or destination too short for that is rejected before anything is
/// written.
pub fn rgb24_to_bgra(dest: &mut [u8], src: &[u8], width: u32, height: u32) -> CameraResult<()> {
    let pixels = pixel_count(width, height)?;
    let src_len = pixels
        .checked_mul(3)
        .ok_or_else(|| CameraError::SizeOverflow {
            context: "color source",
        })?;
    let dest_len = pixels
        .checked_mul(4)
        .ok_or_else(|| CameraError::SizeOverflow {
            context: "color output",
        })?;
    check_len("source", src.len(), src_len)?;
    check_len("destination", dest.len(), dest_len)?;

    for (out, px) in dest[..dest_len]
        .chunks_exact_mut(4)
        .zip(src[..src_len].chunks_exact(3))
    {
        out[..3].copy_from_slice(px);
        out[3] = 0;
    }
    Ok(())
}

/// Copy a 16-bit monochrome frame verbatim.
pub fn copy_mono16(dest: &mut [u8], src: &[u8], width: u32, height: u32) -> CameraResult<()> {
    let len = pixel_count(width, height)?
        .checked_mul(2)
        .ok_or_else(|| CameraError::SizeOverflow {
            context: "mono frame",
        })?;
    check_len("source", src.len(), len)?;
    check_len("destination", dest.len(), len)?;
    dest[..len].copy_from_slice(&src[..len]);
    Ok(())
}

fn pixel_count(width: u32, height: u32) -> CameraResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| CameraError::SizeOverflow {
            context: "pixel count",
        })
}

fn check_len(which: &str, actual: usize, needed: usize) -> CameraResult<()> {
    if actual < needed {
        return Err(CameraError::InvalidFrame(format!(
            "{} holds {} bytes, {} needed",
            which, actual, needed
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_every_pixel_with_zero_fourth_byte() {
        let src: Vec<u8> = (0..2 * 3 * 3).map(|i| i as u8 + 1).collect();
        let mut dest = vec![0xFFu8; 2 * 3 * 4];
        rgb24_to_bgra(&mut dest, &src, 3, 2).unwrap();

        for (out, px) in dest.chunks_exact(4).zip(src.chunks_exact(3)) {
            assert_eq!(&out[..3], px);
            assert_eq!(out[3], 0);
        }
    }

    #[test]
    fn never_reads_past_declared_size() {
        // Trailing info block in the source must be ignored.
        let mut src = vec![7u8; 4 * 3];
        src.extend_from_slice(&[0xAA; 16]);
        let mut dest = vec![0u8; 4 * 4 + 8];
        rgb24_to_bgra(&mut dest, &src, 2, 2).unwrap();
        assert!(dest[16..].iter().all(|b| *b == 0));
    }

    #[test]
    fn short_buffers_rejected() {
        let mut dest = vec![0u8; 16];
        assert!(matches!(
            rgb24_to_bgra(&mut dest, &[0u8; 11], 2, 2),
            Err(CameraError::InvalidFrame(_))
        ));
        let mut small = vec![0u8; 15];
        assert!(rgb24_to_bgra(&mut small, &[0u8; 12], 2, 2).is_err());
        assert!(copy_mono16(&mut dest, &[0u8; 7], 2, 2).is_err());
    }

    #[test]
    fn mono_copied_verbatim() {
        let src: Vec<u8> = (0..8).collect();
        let mut dest = vec![0u8; 8];
        copy_mono16(&mut dest, &src, 2, 2).unwrap();
        assert_eq!(dest, src);
    }
}
