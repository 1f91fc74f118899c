// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wide-word kernels for the hot 4:2:2 conversions.
//!
//! Each pixel group is lifted through one unaligned 8-byte load instead of
//! five byte loads, with a scalar tail for the groups whose 8-byte window
//! would run past the buffer. Output is byte-identical to
//! [`super::scalar`]; the unit tests enforce that on random images.

use super::scalar;
use crate::error::Result;

/// Number of leading groups whose 8-byte load window stays in bounds.
fn fast_groups(len: usize, group: usize, cnt: usize) -> usize {
    if len < 8 {
        return 0;
    }
    (((len - 8) / group) + 1).min(cnt)
}

/// Wire 4:2:2 10-bit to planar, wide path.
pub fn pg422be10_to_planar10(
    pg: &[u8],
    y: &mut [u16],
    b: &mut [u16],
    r: &mut [u16],
    w: u32,
    h: u32,
) -> Result<()> {
    let cnt = (w as usize * h as usize) / 2;
    if w == 0 || h == 0 || (w as usize * h as usize) % 2 != 0 || pg.len() < cnt * 5 {
        return scalar::pg422be10_to_planar10(pg, y, b, r, w, h);
    }
    if y.len() < cnt * 2 || b.len() < cnt || r.len() < cnt {
        return scalar::pg422be10_to_planar10(pg, y, b, r, w, h);
    }

    let fast = fast_groups(pg.len(), 5, cnt);
    for i in 0..fast {
        let win: [u8; 8] = pg[i * 5..i * 5 + 8].try_into().expect("8-byte window");
        let v = u64::from_be_bytes(win) >> 24;
        b[i] = ((v >> 30) & 0x3ff) as u16;
        y[2 * i] = ((v >> 20) & 0x3ff) as u16;
        r[i] = ((v >> 10) & 0x3ff) as u16;
        y[2 * i + 1] = (v & 0x3ff) as u16;
    }
    if fast < cnt {
        let tail_px = ((cnt - fast) * 2) as u32;
        scalar::pg422be10_to_planar10(
            &pg[fast * 5..],
            &mut y[fast * 2..],
            &mut b[fast..],
            &mut r[fast..],
            tail_px,
            1,
        )?;
    }
    Ok(())
}

/// Planar to wire 4:2:2 10-bit, wide path.
pub fn planar10_to_pg422be10(
    y: &[u16],
    b: &[u16],
    r: &[u16],
    pg: &mut [u8],
    w: u32,
    h: u32,
) -> Result<()> {
    let cnt = (w as usize * h as usize) / 2;
    if w == 0
        || h == 0
        || (w as usize * h as usize) % 2 != 0
        || pg.len() < cnt * 5
        || y.len() < cnt * 2
        || b.len() < cnt
        || r.len() < cnt
    {
        return scalar::planar10_to_pg422be10(y, b, r, pg, w, h);
    }

    // 8-byte stores clobber the first bytes of the following group; going
    // front to back each group is rewritten before anyone reads it, and
    // the scalar tail rewrites the last clobbered bytes.
    let fast = fast_groups(pg.len(), 5, cnt);
    for i in 0..fast {
        let v = (u64::from(b[i] & 0x3ff) << 30)
            | (u64::from(y[2 * i] & 0x3ff) << 20)
            | (u64::from(r[i] & 0x3ff) << 10)
            | u64::from(y[2 * i + 1] & 0x3ff);
        pg[i * 5..i * 5 + 8].copy_from_slice(&(v << 24).to_be_bytes());
    }
    if fast < cnt {
        let tail_px = ((cnt - fast) * 2) as u32;
        scalar::planar10_to_pg422be10(
            &y[fast * 2..],
            &b[fast..],
            &r[fast..],
            &mut pg[fast * 5..],
            tail_px,
            1,
        )?;
    }
    Ok(())
}

/// Wire to packed-LE 4:2:2 10-bit, wide path.
pub fn pg422be10_to_pg422le10(src: &[u8], dst: &mut [u8], w: u32, h: u32) -> Result<()> {
    let cnt = (w as usize * h as usize) / 2;
    if w == 0
        || h == 0
        || (w as usize * h as usize) % 2 != 0
        || src.len() < cnt * 5
        || dst.len() < cnt * 5
    {
        return scalar::pg422be10_to_pg422le10(src, dst, w, h);
    }
    let fast = fast_groups(src.len(), 5, cnt).min(fast_groups(dst.len(), 5, cnt));
    for i in 0..fast {
        let win: [u8; 8] = src[i * 5..i * 5 + 8].try_into().expect("8-byte window");
        let v = u64::from_be_bytes(win) >> 24;
        let o = (v >> 30) | (((v >> 20) & 0x3ff) << 10) | (((v >> 10) & 0x3ff) << 20)
            | ((v & 0x3ff) << 30);
        dst[i * 5..i * 5 + 8].copy_from_slice(&o.to_le_bytes());
    }
    if fast < cnt {
        let tail_px = ((cnt - fast) * 2) as u32;
        scalar::pg422be10_to_pg422le10(&src[fast * 5..], &mut dst[fast * 5..], tail_px, 1)?;
    }
    Ok(())
}

/// Packed-LE to wire 4:2:2 10-bit, wide path.
pub fn pg422le10_to_pg422be10(src: &[u8], dst: &mut [u8], w: u32, h: u32) -> Result<()> {
    let cnt = (w as usize * h as usize) / 2;
    if w == 0
        || h == 0
        || (w as usize * h as usize) % 2 != 0
        || src.len() < cnt * 5
        || dst.len() < cnt * 5
    {
        return scalar::pg422le10_to_pg422be10(src, dst, w, h);
    }
    let fast = fast_groups(src.len(), 5, cnt).min(fast_groups(dst.len(), 5, cnt));
    for i in 0..fast {
        let win: [u8; 8] = src[i * 5..i * 5 + 8].try_into().expect("8-byte window");
        let v = u64::from_le_bytes(win) & 0xff_ffff_ffff;
        let o = ((v & 0x3ff) << 30) | (((v >> 10) & 0x3ff) << 20) | (((v >> 20) & 0x3ff) << 10)
            | ((v >> 30) & 0x3ff);
        dst[i * 5..i * 5 + 8].copy_from_slice(&(o << 24).to_be_bytes());
    }
    if fast < cnt {
        let tail_px = ((cnt - fast) * 2) as u32;
        scalar::pg422le10_to_pg422be10(&src[fast * 5..], &mut dst[fast * 5..], tail_px, 1)?;
    }
    Ok(())
}

/// Wire 4:2:2 12-bit to planar, wide path.
pub fn pg422be12_to_planar12(
    pg: &[u8],
    y: &mut [u16],
    b: &mut [u16],
    r: &mut [u16],
    w: u32,
    h: u32,
) -> Result<()> {
    let cnt = (w as usize * h as usize) / 2;
    if w == 0
        || h == 0
        || (w as usize * h as usize) % 2 != 0
        || pg.len() < cnt * 6
        || y.len() < cnt * 2
        || b.len() < cnt
        || r.len() < cnt
    {
        return scalar::pg422be12_to_planar12(pg, y, b, r, w, h);
    }
    let fast = fast_groups(pg.len(), 6, cnt);
    for i in 0..fast {
        let win: [u8; 8] = pg[i * 6..i * 6 + 8].try_into().expect("8-byte window");
        let v = u64::from_be_bytes(win) >> 16;
        b[i] = ((v >> 36) & 0xfff) as u16;
        y[2 * i] = ((v >> 24) & 0xfff) as u16;
        r[i] = ((v >> 12) & 0xfff) as u16;
        y[2 * i + 1] = (v & 0xfff) as u16;
    }
    if fast < cnt {
        let tail_px = ((cnt - fast) * 2) as u32;
        scalar::pg422be12_to_planar12(
            &pg[fast * 6..],
            &mut y[fast * 2..],
            &mut b[fast..],
            &mut r[fast..],
            tail_px,
            1,
        )?;
    }
    Ok(())
}

/// Planar to wire 4:2:2 12-bit, wide path.
pub fn planar12_to_pg422be12(
    y: &[u16],
    b: &[u16],
    r: &[u16],
    pg: &mut [u8],
    w: u32,
    h: u32,
) -> Result<()> {
    let cnt = (w as usize * h as usize) / 2;
    if w == 0
        || h == 0
        || (w as usize * h as usize) % 2 != 0
        || pg.len() < cnt * 6
        || y.len() < cnt * 2
        || b.len() < cnt
        || r.len() < cnt
    {
        return scalar::planar12_to_pg422be12(y, b, r, pg, w, h);
    }
    let fast = fast_groups(pg.len(), 6, cnt);
    for i in 0..fast {
        let v = (u64::from(b[i] & 0xfff) << 36)
            | (u64::from(y[2 * i] & 0xfff) << 24)
            | (u64::from(r[i] & 0xfff) << 12)
            | u64::from(y[2 * i + 1] & 0xfff);
        pg[i * 6..i * 6 + 8].copy_from_slice(&(v << 16).to_be_bytes());
    }
    if fast < cnt {
        let tail_px = ((cnt - fast) * 2) as u32;
        scalar::planar12_to_pg422be12(
            &y[fast * 2..],
            &b[fast..],
            &r[fast..],
            &mut pg[fast * 6..],
            tail_px,
            1,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_bytes(n: usize) -> Vec<u8> {
        (0..n).map(|_| fastrand::u8(..)).collect()
    }

    fn random_planar(n: usize, bits: u32) -> Vec<u16> {
        let mask = (1u16 << bits) - 1;
        (0..n).map(|_| fastrand::u16(..) & mask).collect()
    }

    /// Odd sizes exercise the scalar tail; wide output must match the
    /// scalar authority byte for byte.
    #[test]
    fn test_wide_decode10_matches_scalar() {
        for (w, h) in [(2u32, 1u32), (6, 1), (1920, 2), (1280, 3)] {
            let cnt = (w * h / 2) as usize;
            let pg = random_bytes(cnt * 5);
            let (mut y1, mut b1, mut r1) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
            let (mut y2, mut b2, mut r2) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
            scalar::pg422be10_to_planar10(&pg, &mut y1, &mut b1, &mut r1, w, h).unwrap();
            pg422be10_to_planar10(&pg, &mut y2, &mut b2, &mut r2, w, h).unwrap();
            assert_eq!((y1, b1, r1), (y2, b2, r2), "{}x{}", w, h);
        }
    }

    #[test]
    fn test_wide_encode10_matches_scalar() {
        for (w, h) in [(2u32, 1u32), (10, 1), (720, 4)] {
            let cnt = (w * h / 2) as usize;
            let y = random_planar(cnt * 2, 10);
            let b = random_planar(cnt, 10);
            let r = random_planar(cnt, 10);
            let mut pg1 = vec![0u8; cnt * 5];
            let mut pg2 = vec![0u8; cnt * 5];
            scalar::planar10_to_pg422be10(&y, &b, &r, &mut pg1, w, h).unwrap();
            planar10_to_pg422be10(&y, &b, &r, &mut pg2, w, h).unwrap();
            assert_eq!(pg1, pg2, "{}x{}", w, h);
        }
    }

    #[test]
    fn test_wide_byteorder10_matches_scalar() {
        for (w, h) in [(2u32, 1u32), (1920, 1), (16, 9)] {
            let cnt = (w * h / 2) as usize;
            let src = random_bytes(cnt * 5);
            let mut le1 = vec![0u8; cnt * 5];
            let mut le2 = vec![0u8; cnt * 5];
            scalar::pg422be10_to_pg422le10(&src, &mut le1, w, h).unwrap();
            pg422be10_to_pg422le10(&src, &mut le2, w, h).unwrap();
            assert_eq!(le1, le2);

            let mut be1 = vec![0u8; cnt * 5];
            let mut be2 = vec![0u8; cnt * 5];
            scalar::pg422le10_to_pg422be10(&le1, &mut be1, w, h).unwrap();
            pg422le10_to_pg422be10(&le1, &mut be2, w, h).unwrap();
            assert_eq!(be1, be2);
        }
    }

    #[test]
    fn test_wide_12bit_matches_scalar() {
        for (w, h) in [(2u32, 1u32), (1280, 2), (8, 5)] {
            let cnt = (w * h / 2) as usize;
            let pg = random_bytes(cnt * 6);
            let (mut y1, mut b1, mut r1) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
            let (mut y2, mut b2, mut r2) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
            scalar::pg422be12_to_planar12(&pg, &mut y1, &mut b1, &mut r1, w, h).unwrap();
            pg422be12_to_planar12(&pg, &mut y2, &mut b2, &mut r2, w, h).unwrap();
            assert_eq!((&y1, &b1, &r1), (&y2, &b2, &r2));

            let mut enc1 = vec![0u8; cnt * 6];
            let mut enc2 = vec![0u8; cnt * 6];
            scalar::planar12_to_pg422be12(&y1, &b1, &r1, &mut enc1, w, h).unwrap();
            planar12_to_pg422be12(&y2, &b2, &r2, &mut enc2, w, h).unwrap();
            assert_eq!(enc1, enc2);
        }
    }

    #[test]
    fn test_wide_rejects_bad_dims_like_scalar() {
        let mut y = [0u16; 2];
        let mut b = [0u16; 1];
        let mut r = [0u16; 1];
        assert!(pg422be10_to_planar10(&[0; 5], &mut y, &mut b, &mut r, 1, 1).is_err());
        assert!(pg422be10_to_planar10(&[0; 3], &mut y, &mut b, &mut r, 2, 1).is_err());
    }
}
