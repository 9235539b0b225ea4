//! Byte-order conversion for captured frames
//!
//! Desktop textures arrive as BGRA; delivered surfaces are RGBA. The swap is
//! its own inverse, so one routine serves both directions.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Buffers at least this large are split across the rayon pool
#[cfg(feature = "parallel")]
const PARALLEL_THRESHOLD: usize = 1 << 20;

/// Per-task chunk when swizzling in parallel (multiple of 32 bytes)
#[cfg(feature = "parallel")]
const PARALLEL_CHUNK: usize = 256 * 1024;

/// Channel swapper with runtime SIMD dispatch
pub struct SimdConverter {
    has_avx2: bool,
    has_ssse3: bool,
    has_neon: bool,
}

impl SimdConverter {
    /// Create a new converter with runtime feature detection
    pub fn new() -> Self {
        Self {
            #[cfg(target_arch = "x86_64")]
            has_avx2: is_x86_feature_detected!("avx2"),
            #[cfg(not(target_arch = "x86_64"))]
            has_avx2: false,

            #[cfg(target_arch = "x86_64")]
            has_ssse3: is_x86_feature_detected!("ssse3"),
            #[cfg(not(target_arch = "x86_64"))]
            has_ssse3: false,

            // mandatory on AArch64
            #[cfg(target_arch = "aarch64")]
            has_neon: true,
            #[cfg(not(target_arch = "aarch64"))]
            has_neon: false,
        }
    }

    /// A converter that never takes a SIMD path
    pub fn scalar() -> Self {
        Self {
            has_avx2: false,
            has_ssse3: false,
            has_neon: false,
        }
    }

    /// Swap bytes 0 and 2 of every 4-byte pixel (BGRA <-> RGBA).
    ///
    /// Trailing bytes that do not form a whole pixel are left alone.
    pub fn swizzle_in_place(&self, data: &mut [u8]) {
        #[cfg(target_arch = "x86_64")]
        {
            if self.has_avx2 {
                // SAFETY: avx2 support was detected at construction
                unsafe { swizzle_avx2(data) }
            } else if self.has_ssse3 {
                // SAFETY: ssse3 support was detected at construction
                unsafe { swizzle_ssse3(data) }
            } else {
                swizzle_scalar(data)
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            if self.has_neon {
                // SAFETY: NEON is part of the AArch64 baseline
                unsafe { swizzle_neon(data) }
            } else {
                swizzle_scalar(data)
            }
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            swizzle_scalar(data)
        }
    }

    /// Like [`SimdConverter::swizzle_in_place`], fanning large frames out to rayon.
    pub fn swizzle_frame(&self, data: &mut [u8]) {
        #[cfg(feature = "parallel")]
        {
            if data.len() >= PARALLEL_THRESHOLD {
                data.par_chunks_mut(PARALLEL_CHUNK)
                    .for_each(|chunk| self.swizzle_in_place(chunk));
                return;
            }
        }
        self.swizzle_in_place(data)
    }

    /// Drop the alpha channel: packed RGBA in, packed RGB out.
    ///
    /// `dst` must hold at least `src.len() / 4 * 3` bytes.
    pub fn rgba_to_rgb(&self, src: &[u8], dst: &mut [u8]) {
        for (rgb, rgba) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
            rgb.copy_from_slice(&rgba[..3]);
        }
    }

    /// Get SIMD capabilities as a string
    pub fn capabilities(&self) -> String {
        let mut caps = Vec::new();

        if self.has_avx2 {
            caps.push("AVX2");
        }
        if self.has_ssse3 {
            caps.push("SSSE3");
        }
        if self.has_neon {
            caps.push("NEON");
        }

        if caps.is_empty() {
            "None (scalar)".to_string()
        } else {
            caps.join(", ")
        }
    }
}

impl Default for SimdConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Get global converter instance
pub fn global_converter() -> &'static SimdConverter {
    static CONVERTER: once_cell::sync::Lazy<SimdConverter> =
        once_cell::sync::Lazy::new(SimdConverter::new);
    &CONVERTER
}

fn swizzle_scalar(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn swizzle_avx2(data: &mut [u8]) {
    let mask = _mm256_setr_epi8(
        2, 1, 0, 3, 6, 5, 4, 7, 10, 9, 8, 11, 14, 13, 12, 15, //
        2, 1, 0, 3, 6, 5, 4, 7, 10, 9, 8, 11, 14, 13, 12, 15,
    );

    let simd_len = data.len() & !31;
    let base = data.as_mut_ptr();
    for i in (0..simd_len).step_by(32) {
        let ptr = base.add(i) as *mut __m256i;
        _mm256_storeu_si256(ptr, _mm256_shuffle_epi8(_mm256_loadu_si256(ptr), mask));
    }

    swizzle_scalar(&mut data[simd_len..]);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3")]
unsafe fn swizzle_ssse3(data: &mut [u8]) {
    let mask = _mm_setr_epi8(2, 1, 0, 3, 6, 5, 4, 7, 10, 9, 8, 11, 14, 13, 12, 15);

    let simd_len = data.len() & !15;
    let base = data.as_mut_ptr();
    for i in (0..simd_len).step_by(16) {
        let ptr = base.add(i) as *mut __m128i;
        _mm_storeu_si128(ptr, _mm_shuffle_epi8(_mm_loadu_si128(ptr), mask));
    }

    swizzle_scalar(&mut data[simd_len..]);
}

#[cfg(target_arch = "aarch64")]
unsafe fn swizzle_neon(data: &mut [u8]) {
    use std::arch::aarch64::*;

    // vld4q_u8 de-interleaves 16 pixels (64 bytes) per load
    let simd_len = data.len() & !63;
    let base = data.as_mut_ptr();
    for i in (0..simd_len).step_by(64) {
        let ptr = base.add(i);
        let px = vld4q_u8(ptr);
        vst4q_u8(ptr, uint8x16x4_t(px.2, px.1, px.0, px.3));
    }

    swizzle_scalar(&mut data[simd_len..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_swizzle_two_pixels() {
        let converter = SimdConverter::new();
        let mut data = vec![0, 1, 2, 3, 4, 5, 6, 7];

        converter.swizzle_in_place(&mut data);

        assert_eq!(data, vec![2, 1, 0, 3, 6, 5, 4, 7]);
    }

    #[test]
    fn test_simd_matches_scalar_on_odd_lengths() {
        // covers SIMD bodies plus scalar tails, including a partial pixel
        for len in [4, 60, 64, 100, 132, 1027] {
            let mut fast = pattern(len);
            let mut slow = fast.clone();
            SimdConverter::new().swizzle_in_place(&mut fast);
            SimdConverter::scalar().swizzle_in_place(&mut slow);
            assert_eq!(fast, slow, "length {}", len);
        }
    }

    #[test]
    fn test_swizzle_frame_large_buffer() {
        let mut frame = pattern(1920 * 1080 * 4);
        let original = frame.clone();

        global_converter().swizzle_frame(&mut frame);
        assert_eq!(frame[0], original[2]);
        assert_eq!(frame[2], original[0]);

        global_converter().swizzle_frame(&mut frame);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_rgba_to_rgb() {
        let converter = SimdConverter::new();
        let src = vec![255, 128, 64, 255, 128, 64, 32, 255];
        let mut dst = vec![0u8; 6];

        converter.rgba_to_rgb(&src, &mut dst);

        assert_eq!(dst, vec![255, 128, 64, 128, 64, 32]);
    }
}
