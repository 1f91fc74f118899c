// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DMA-staged conversion kernels.
//!
//! For 4K/8K frames the packed source no longer fits in LLC and the
//! convert loop stalls on source-side misses. The staged variant pulls
//! source bytes through a small set of rotating cache-sized staging
//! buffers using the external [`DmaEngine`], so the CPU converts from
//! warm staging memory while the engine prefetches the next chunk.
//!
//! Any engine failure (allocation, enqueue, submit) degrades to the wide
//! or scalar path for the remaining bytes without losing data; the
//! session counts the fallback but the conversion still succeeds.

use super::{scalar, wide};
use crate::error::Result;
use crate::io::DmaEngine;

/// Minimum rotating staging buffers for copy/compute overlap.
const MIN_STAGING_SLOTS: usize = 4;
/// Staging slot granularity: multiples of a cache line.
const CACHE_LINE: usize = 64;
/// Default staging slot size: 32 KiB keeps a slot inside L1/L2.
const DEFAULT_SLOT_BYTES: usize = 32 * 1024;

/// Rotating staging context, reusable across frames of one session.
pub struct DmaStagedCtx {
    slots: Vec<Vec<u8>>,
    slot_bytes: usize,
    /// Copies handed to the engine over the context lifetime.
    pub submitted: u64,
    /// Copies observed complete.
    pub completed: u64,
    /// Conversions that fell back to the CPU path.
    pub fallbacks: u64,
}

impl DmaStagedCtx {
    /// Allocate a staging context. `slot_bytes` is rounded up to a cache
    /// line; `slots` below the minimum is raised to it.
    pub fn new(slots: usize, slot_bytes: usize) -> Self {
        let slot_bytes = slot_bytes.max(CACHE_LINE).div_ceil(CACHE_LINE) * CACHE_LINE;
        let slots = slots.max(MIN_STAGING_SLOTS);
        DmaStagedCtx {
            slots: (0..slots).map(|_| vec![0u8; slot_bytes]).collect(),
            slot_bytes,
            submitted: 0,
            completed: 0,
            fallbacks: 0,
        }
    }
}

impl Default for DmaStagedCtx {
    fn default() -> Self {
        Self::new(MIN_STAGING_SLOTS, DEFAULT_SLOT_BYTES)
    }
}

/// Drive a conversion through the staging pipeline.
///
/// `group` is the source pixel-group size in bytes; chunks are cut on
/// group boundaries. `convert(group_index, staged_bytes)` converts one
/// staged chunk whose first group is `group_index`.
///
/// Returns `true` when the whole source went through staging, `false`
/// when any part fell back to the direct path (output is complete and
/// correct either way).
fn staged_run<F>(
    engine: &dyn DmaEngine,
    ctx: &mut DmaStagedCtx,
    src: &[u8],
    group: usize,
    mut convert: F,
) -> bool
where
    F: FnMut(usize, &[u8]),
{
    let groups_per_slot = ctx.slot_bytes / group;
    if groups_per_slot == 0 {
        ctx.fallbacks += 1;
        convert(0, src);
        return false;
    }
    let chunk_bytes = groups_per_slot * group;
    let nslots = ctx.slots.len();

    let mut chunk_start = 0usize; // byte offset of next chunk to stage
    let mut staged = 0usize; // chunks handed to the engine
    let mut complete = 0usize; // chunks whose copies have finished
    let mut converted = 0usize; // chunks converted

    while converted * chunk_bytes < src.len() {
        // keep the pipeline full: stage up to nslots chunks ahead
        while staged < converted + nslots && chunk_start < src.len() {
            let end = (chunk_start + chunk_bytes).min(src.len());
            let slot = &mut ctx.slots[staged % nslots];
            if engine.copy(&mut slot[..end - chunk_start], &src[chunk_start..end]).is_err()
                || engine.submit().is_err()
            {
                // engine refused: convert everything not yet converted
                // directly from the source and bail out of staging
                ctx.fallbacks += 1;
                let from = converted * chunk_bytes;
                convert(from / group, &src[from..]);
                return false;
            }
            ctx.submitted += 1;
            staged += 1;
            chunk_start = end;
        }

        // wait for the oldest staged chunk before converting it; the
        // engine completes FIFO per the trait contract. Two empty polls
        // in a row is a stuck engine and treated like a failed submit.
        if complete <= converted {
            let mut got = engine.poll();
            if got == 0 {
                got = engine.poll();
            }
            if got == 0 {
                ctx.fallbacks += 1;
                let from = converted * chunk_bytes;
                convert(from / group, &src[from..]);
                return false;
            }
            ctx.completed += got as u64;
            complete = (complete + got).min(staged);
        }

        while converted < complete {
            let begin = converted * chunk_bytes;
            let end = (begin + chunk_bytes).min(src.len());
            let slot = &ctx.slots[converted % nslots];
            convert(begin / group, &slot[..end - begin]);
            converted += 1;
        }
    }
    true
}

/// DMA-staged wire 4:2:2 10-bit to planar. Falls back to the wide path on
/// engine failure.
pub fn pg422be10_to_planar10(
    engine: &dyn DmaEngine,
    ctx: &mut DmaStagedCtx,
    pg: &[u8],
    y: &mut [u16],
    b: &mut [u16],
    r: &mut [u16],
    w: u32,
    h: u32,
) -> Result<()> {
    // validate exactly like the scalar authority before staging anything
    let pixels = w as usize * h as usize;
    if w == 0 || h == 0 || pixels % 2 != 0 || pg.len() < pixels / 2 * 5 {
        return scalar::pg422be10_to_planar10(pg, y, b, r, w, h);
    }
    let cnt = pixels / 2;
    if y.len() < cnt * 2 || b.len() < cnt || r.len() < cnt {
        return scalar::pg422be10_to_planar10(pg, y, b, r, w, h);
    }

    staged_run(engine, ctx, &pg[..cnt * 5], 5, |group_idx, bytes| {
        let groups = bytes.len() / 5;
        // staged chunks are group-aligned by construction
        let px = (groups * 2) as u32;
        let _ = wide::pg422be10_to_planar10(
            bytes,
            &mut y[group_idx * 2..(group_idx + groups) * 2],
            &mut b[group_idx..group_idx + groups],
            &mut r[group_idx..group_idx + groups],
            px,
            1,
        );
    });
    Ok(())
}

/// DMA-staged planar to wire 4:2:2 10-bit. Stages the Y plane (the large
/// source side); Cb/Cr ride the CPU path.
pub fn planar10_to_pg422be10(
    engine: &dyn DmaEngine,
    ctx: &mut DmaStagedCtx,
    y: &[u16],
    b: &[u16],
    r: &[u16],
    pg: &mut [u8],
    w: u32,
    h: u32,
) -> Result<()> {
    let pixels = w as usize * h as usize;
    if w == 0 || h == 0 || pixels % 2 != 0 {
        return scalar::planar10_to_pg422be10(y, b, r, pg, w, h);
    }
    let cnt = pixels / 2;
    if pg.len() < cnt * 5 || y.len() < cnt * 2 || b.len() < cnt || r.len() < cnt {
        return scalar::planar10_to_pg422be10(y, b, r, pg, w, h);
    }

    // Y is u16: stage it as bytes, 4 bytes of Y per pixel group.
    let y_bytes: &[u8] = unsafe {
        // SAFETY: u16 slice reinterpreted as bytes for the copy engine;
        // length in bytes is exact, alignment of u8 is 1, and the staged
        // bytes are re-read as u16 pairs below with the same layout.
        std::slice::from_raw_parts(y.as_ptr().cast::<u8>(), cnt * 2 * 2)
    };

    staged_run(engine, ctx, y_bytes, 4, |group_idx, bytes| {
        let groups = bytes.len() / 4;
        for k in 0..groups {
            let i = group_idx + k;
            let y0 = u16::from_ne_bytes([bytes[k * 4], bytes[k * 4 + 1]]);
            let y1 = u16::from_ne_bytes([bytes[k * 4 + 2], bytes[k * 4 + 3]]);
            let v = (u64::from(b[i] & 0x3ff) << 30)
                | (u64::from(y0 & 0x3ff) << 20)
                | (u64::from(r[i] & 0x3ff) << 10)
                | u64::from(y1 & 0x3ff);
            let g = &mut pg[i * 5..i * 5 + 5];
            g[0] = (v >> 32) as u8;
            g[1] = (v >> 24) as u8;
            g[2] = (v >> 16) as u8;
            g[3] = (v >> 8) as u8;
            g[4] = v as u8;
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemcpyDma, NoDma};

    fn random_bytes(n: usize) -> Vec<u8> {
        (0..n).map(|_| fastrand::u8(..)).collect()
    }

    #[test]
    fn test_staged_decode_matches_scalar() {
        let (w, h) = (1920u32, 8u32);
        let cnt = (w * h / 2) as usize;
        let pg = random_bytes(cnt * 5);
        let dma = MemcpyDma::new();
        // tiny slots force many chunks through the pipeline
        let mut ctx = DmaStagedCtx::new(4, 640);

        let (mut y1, mut b1, mut r1) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
        let (mut y2, mut b2, mut r2) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
        scalar::pg422be10_to_planar10(&pg, &mut y1, &mut b1, &mut r1, w, h).unwrap();
        pg422be10_to_planar10(&dma, &mut ctx, &pg, &mut y2, &mut b2, &mut r2, w, h).unwrap();
        assert_eq!((y1, b1, r1), (y2, b2, r2));
        assert!(ctx.submitted > 1, "expected multiple staged chunks");
        assert_eq!(ctx.fallbacks, 0);
    }

    #[test]
    fn test_staged_encode_matches_scalar() {
        let (w, h) = (1280u32, 4u32);
        let cnt = (w * h / 2) as usize;
        let y: Vec<u16> = (0..cnt * 2).map(|_| fastrand::u16(..) & 0x3ff).collect();
        let b: Vec<u16> = (0..cnt).map(|_| fastrand::u16(..) & 0x3ff).collect();
        let r: Vec<u16> = (0..cnt).map(|_| fastrand::u16(..) & 0x3ff).collect();
        let dma = MemcpyDma::new();
        let mut ctx = DmaStagedCtx::new(5, 512);

        let mut pg1 = vec![0u8; cnt * 5];
        let mut pg2 = vec![0u8; cnt * 5];
        scalar::planar10_to_pg422be10(&y, &b, &r, &mut pg1, w, h).unwrap();
        planar10_to_pg422be10(&dma, &mut ctx, &y, &b, &r, &mut pg2, w, h).unwrap();
        assert_eq!(pg1, pg2);
    }

    #[test]
    fn test_staged_falls_back_on_dead_engine() {
        let (w, h) = (64u32, 2u32);
        let cnt = (w * h / 2) as usize;
        let pg = random_bytes(cnt * 5);
        let mut ctx = DmaStagedCtx::default();

        let (mut y1, mut b1, mut r1) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
        let (mut y2, mut b2, mut r2) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
        scalar::pg422be10_to_planar10(&pg, &mut y1, &mut b1, &mut r1, w, h).unwrap();
        pg422be10_to_planar10(&NoDma, &mut ctx, &pg, &mut y2, &mut b2, &mut r2, w, h).unwrap();
        assert_eq!((y1, b1, r1), (y2, b2, r2), "fallback must not lose data");
        assert!(ctx.fallbacks > 0);
    }

    #[test]
    fn test_staged_rejects_bad_dims() {
        let dma = MemcpyDma::new();
        let mut ctx = DmaStagedCtx::default();
        let mut y = [0u16; 2];
        let mut b = [0u16; 1];
        let mut r = [0u16; 1];
        assert!(
            pg422be10_to_planar10(&dma, &mut ctx, &[0; 5], &mut y, &mut b, &mut r, 1, 1).is_err()
        );
    }
}
