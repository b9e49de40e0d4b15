//! # SIMD-Accelerated Distance Kernels
//!
//! Dense-vector kernels used by the float and byte spaces.
//!
//! ## Supported Operations
//! - Dot product, squared L2, cosine similarity over `f32`
//! - L1 over `f32`
//! - Squared L2 and L1 over `u8` (integer results)
//!
//! ## Implementation Strategy
//! 1. Detect CPU features at runtime
//! 2. Dispatch to the fastest available: AVX2+FMA > Scalar on x86_64,
//!    NEON on aarch64

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

/// Dot product of two equal-length vectors
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { dot_product_avx2_fma(a, b) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { dot_product_neon(a, b) };
    }

    #[allow(unreachable_code)]
    dot_product_scalar(a, b)
}

/// Squared Euclidean distance
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { l2_squared_avx2_fma(a, b) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { l2_squared_neon(a, b) };
    }

    #[allow(unreachable_code)]
    l2_squared_scalar(a, b)
}

/// Euclidean distance
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}

/// Cosine similarity: dot(a,b) / (||a|| * ||b||), 0 when either norm is 0
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { cosine_similarity_avx2_fma(a, b) };
        }
    }

    #[allow(unreachable_code)]
    cosine_similarity_scalar(a, b)
}

/// Cosine distance: 1 - cosine_similarity
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Manhattan distance
#[inline]
pub fn l1_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Squared Euclidean distance over bytes, as used by SIFT descriptors.
/// Sums past `i32::MAX` saturate.
#[inline]
pub fn l2_squared_u8(a: &[u8], b: &[u8]) -> i32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { l2_squared_u8_avx2(a, b) };
        }
    }

    l2_squared_u8_scalar(a, b)
}

/// Manhattan distance over bytes, saturating like [`l2_squared_u8`]
#[inline]
pub fn l1_u8(a: &[u8], b: &[u8]) -> i32 {
    debug_assert_eq!(a.len(), b.len());
    let total: i64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as i64 - y as i64).abs())
        .sum();
    saturate_i32(total)
}

#[inline]
fn saturate_i32(v: i64) -> i32 {
    v.min(i32::MAX as i64) as i32
}

// ============================================================================
// Scalar implementations (fallback)
// ============================================================================

#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn l2_squared_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
fn cosine_similarity_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[inline]
fn l2_squared_u8_scalar(a: &[u8], b: &[u8]) -> i32 {
    saturate_i32(l2_squared_u8_wide(a, b))
}

#[inline]
fn l2_squared_u8_wide(a: &[u8], b: &[u8]) -> i64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i64 - y as i64;
            d * d
        })
        .sum()
}

// ============================================================================
// AVX2 + FMA implementations (256-bit, 8 floats at a time)
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn dot_product_avx2_fma(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 8;
    let mut sum = _mm256_setzero_ps();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        sum = _mm256_fmadd_ps(va, vb, sum);
    }

    let tail = chunks * 8;
    hsum256_ps(sum) + dot_product_scalar(&a[tail..], &b[tail..])
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn l2_squared_avx2_fma(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 8;
    let mut sum = _mm256_setzero_ps();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        let diff = _mm256_sub_ps(va, vb);
        sum = _mm256_fmadd_ps(diff, diff, sum);
    }

    let tail = chunks * 8;
    hsum256_ps(sum) + l2_squared_scalar(&a[tail..], &b[tail..])
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn cosine_similarity_avx2_fma(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 8;
    let mut dot_sum = _mm256_setzero_ps();
    let mut norm_a_sum = _mm256_setzero_ps();
    let mut norm_b_sum = _mm256_setzero_ps();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        dot_sum = _mm256_fmadd_ps(va, vb, dot_sum);
        norm_a_sum = _mm256_fmadd_ps(va, va, norm_a_sum);
        norm_b_sum = _mm256_fmadd_ps(vb, vb, norm_b_sum);
    }

    let mut dot = hsum256_ps(dot_sum);
    let mut norm_a = hsum256_ps(norm_a_sum);
    let mut norm_b = hsum256_ps(norm_b_sum);

    for i in chunks * 8..a.len() {
        let (x, y) = (a[i], b[i]);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

/// Chunks summed in i32 lanes before flushing to i64; each chunk adds at
/// most 2 * 255² per lane
#[cfg(target_arch = "x86_64")]
const U8_CHUNKS_PER_FLUSH: usize = 4096;

/// 16 bytes at a time, widened to i16 then multiplied-added into i32 lanes
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn l2_squared_u8_avx2(a: &[u8], b: &[u8]) -> i32 {
    let chunks = a.len() / 16;
    let mut total: i64 = 0;

    for block in (0..chunks).step_by(U8_CHUNKS_PER_FLUSH) {
        let mut sum = _mm256_setzero_si256();
        for i in block..(block + U8_CHUNKS_PER_FLUSH).min(chunks) {
            let va = _mm256_cvtepu8_epi16(_mm_loadu_si128(a.as_ptr().add(i * 16) as *const __m128i));
            let vb = _mm256_cvtepu8_epi16(_mm_loadu_si128(b.as_ptr().add(i * 16) as *const __m128i));
            let diff = _mm256_sub_epi16(va, vb);
            sum = _mm256_add_epi32(sum, _mm256_madd_epi16(diff, diff));
        }
        total += hsum256_epi32_wide(sum);
    }

    let tail = chunks * 16;
    saturate_i32(total + l2_squared_u8_wide(&a[tail..], &b[tail..]))
}

// ============================================================================
// Horizontal sums
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
#[inline]
unsafe fn hsum256_ps(v: __m256) -> f32 {
    let high = _mm256_extractf128_ps(v, 1);
    let low = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(high, low);
    let shuf = _mm_movehdup_ps(sum128);
    let sums = _mm_add_ps(sum128, shuf);
    let shuf = _mm_movehl_ps(sums, sums);
    _mm_cvtss_f32(_mm_add_ss(sums, shuf))
}

/// Sum of eight non-negative i32 lanes without overflow
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn hsum256_epi32_wide(v: __m256i) -> i64 {
    let mut lanes = [0i32; 8];
    _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, v);
    lanes.iter().map(|&x| x as i64).sum()
}

// ============================================================================
// ARM NEON implementations (128-bit, 4 floats at a time)
// ============================================================================

#[cfg(target_arch = "aarch64")]
#[inline]
unsafe fn dot_product_neon(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 4;
    let mut sum = vdupq_n_f32(0.0);

    for i in 0..chunks {
        let va = vld1q_f32(a.as_ptr().add(i * 4));
        let vb = vld1q_f32(b.as_ptr().add(i * 4));
        sum = vfmaq_f32(sum, va, vb);
    }

    let tail = chunks * 4;
    vaddvq_f32(sum) + dot_product_scalar(&a[tail..], &b[tail..])
}

#[cfg(target_arch = "aarch64")]
#[inline]
unsafe fn l2_squared_neon(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 4;
    let mut sum = vdupq_n_f32(0.0);

    for i in 0..chunks {
        let va = vld1q_f32(a.as_ptr().add(i * 4));
        let vb = vld1q_f32(b.as_ptr().add(i * 4));
        let diff = vsubq_f32(va, vb);
        sum = vfmaq_f32(sum, diff, diff);
    }

    let tail = chunks * 4;
    vaddvq_f32(sum) + l2_squared_scalar(&a[tail..], &b[tail..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernels_match_scalar_with_tail() {
        let a: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..19).map(|i| (19 - i) as f32 * 0.25).collect();
        assert!((dot_product(&a, &b) - dot_product_scalar(&a, &b)).abs() < 1e-3);
        assert!((l2_distance_squared(&a, &b) - l2_squared_scalar(&a, &b)).abs() < 1e-3);
        assert!((cosine_similarity(&a, &b) - cosine_similarity_scalar(&a, &b)).abs() < 1e-5);
    }

    #[test]
    fn test_byte_l2_with_tail() {
        let a: Vec<u8> = (0..37).map(|i| (i * 7 % 256) as u8).collect();
        let b: Vec<u8> = (0..37).map(|i| (255 - i * 3) as u8).collect();
        assert_eq!(l2_squared_u8(&a, &b), l2_squared_u8_scalar(&a, &b));
        assert_eq!(l2_squared_u8(&[0, 255], &[255, 0]), 2 * 255 * 255);
    }

    #[test]
    fn test_byte_distances_saturate() {
        // 40000 * 255² is past i32::MAX
        let zeros = vec![0u8; 40_000];
        let full = vec![255u8; 40_000];
        assert_eq!(l2_squared_u8(&zeros, &full), i32::MAX);
        assert_eq!(l2_squared_u8_scalar(&zeros, &full), i32::MAX);
        assert_eq!(l2_squared_u8_wide(&zeros, &full), 2_601_000_000);

        // Just under the limit stays exact
        let n = 33_000;
        assert_eq!(l2_squared_u8(&zeros[..n], &full[..n]), (n as i32) * 255 * 255);

        let long = vec![255u8; 9_000_000];
        assert_eq!(l1_u8(&long, &vec![0u8; 9_000_000]), i32::MAX);
    }

    #[test]
    fn test_l1() {
        assert_eq!(l1_distance(&[1.0, -2.0], &[4.0, 2.0]), 7.0);
        assert_eq!(l1_u8(&[10, 0], &[0, 10]), 20);
    }

    #[test]
    fn test_zero_vector_cosine() {
        assert_eq!(cosine_similarity(&[0.0; 8], &[1.0; 8]), 0.0);
        assert_eq!(cosine_distance(&[0.0; 8], &[1.0; 8]), 1.0);
    }
}
