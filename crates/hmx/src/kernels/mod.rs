// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pixel-group conversion kernels.
//!
//! Three tiers per conversion, selected at run time in this order:
//!
//! 1. **DMA-staged** ([`dma`]) - for frames whose packed side blows the
//!    LLC; stages source bytes through rotating cache-sized buffers.
//! 2. **Wide** ([`wide`]) - 64-bit-word kernels for the hot 4:2:2 paths.
//! 3. **Scalar** ([`scalar`]) - the reference; the authority every other
//!    tier is byte-compared against.
//!
//! The dispatchers in this module implement that order and degrade
//! silently: a missing/failed DMA engine or an unavailable wide kernel
//! never fails a conversion, it only changes which tier does the work.
//!
//! [`CpuLevel`] reports the host's SIMD capability; it is probed once at
//! first use and logged. Kernel tiers in this crate are portable, so the
//! probe gates nothing functionally - it exists so sessions can report
//! the datapath in effect and so a forced-scalar mode is testable.

pub mod dma;
pub mod scalar;
pub mod wide;

pub use dma::DmaStagedCtx;

use crate::error::Result;
use crate::io::DmaEngine;
use std::sync::OnceLock;

/// Host SIMD capability, widest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CpuLevel {
    Scalar,
    Sse42,
    Avx2,
    Avx512,
}

impl std::fmt::Display for CpuLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CpuLevel::Scalar => "scalar",
            CpuLevel::Sse42 => "sse4.2",
            CpuLevel::Avx2 => "avx2",
            CpuLevel::Avx512 => "avx512",
        };
        f.write_str(name)
    }
}

#[cfg(target_arch = "x86_64")]
fn probe_cpu_level() -> CpuLevel {
    if std::arch::is_x86_feature_detected!("avx512f") {
        CpuLevel::Avx512
    } else if std::arch::is_x86_feature_detected!("avx2") {
        CpuLevel::Avx2
    } else if std::arch::is_x86_feature_detected!("sse4.2") {
        CpuLevel::Sse42
    } else {
        CpuLevel::Scalar
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn probe_cpu_level() -> CpuLevel {
    CpuLevel::Scalar
}

/// Host SIMD level, probed once.
pub fn cpu_level() -> CpuLevel {
    static LEVEL: OnceLock<CpuLevel> = OnceLock::new();
    *LEVEL.get_or_init(|| {
        let level = probe_cpu_level();
        log::info!("[kernels] cpu simd level: {}", level);
        level
    })
}

/// Kernel tier selection for a session's conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelTier {
    /// DMA-staged when an engine is bound, wide otherwise.
    #[default]
    Auto,
    /// Skip DMA staging, use the wide kernels.
    Wide,
    /// Reference path only (testing / verification).
    ForceScalar,
}

/// Wire 4:2:2 10-bit to planar with tier dispatch.
pub fn pg422be10_to_planar10(
    tier: KernelTier,
    engine: Option<(&dyn DmaEngine, &mut DmaStagedCtx)>,
    pg: &[u8],
    y: &mut [u16],
    b: &mut [u16],
    r: &mut [u16],
    w: u32,
    h: u32,
) -> Result<()> {
    match tier {
        KernelTier::ForceScalar => scalar::pg422be10_to_planar10(pg, y, b, r, w, h),
        KernelTier::Wide => wide::pg422be10_to_planar10(pg, y, b, r, w, h),
        KernelTier::Auto => match engine {
            Some((eng, ctx)) => dma::pg422be10_to_planar10(eng, ctx, pg, y, b, r, w, h),
            None => wide::pg422be10_to_planar10(pg, y, b, r, w, h),
        },
    }
}

/// Planar to wire 4:2:2 10-bit with tier dispatch.
pub fn planar10_to_pg422be10(
    tier: KernelTier,
    engine: Option<(&dyn DmaEngine, &mut DmaStagedCtx)>,
    y: &[u16],
    b: &[u16],
    r: &[u16],
    pg: &mut [u8],
    w: u32,
    h: u32,
) -> Result<()> {
    match tier {
        KernelTier::ForceScalar => scalar::planar10_to_pg422be10(y, b, r, pg, w, h),
        KernelTier::Wide => wide::planar10_to_pg422be10(y, b, r, pg, w, h),
        KernelTier::Auto => match engine {
            Some((eng, ctx)) => dma::planar10_to_pg422be10(eng, ctx, y, b, r, pg, w, h),
            None => wide::planar10_to_pg422be10(y, b, r, pg, w, h),
        },
    }
}

/// Wire to packed-LE 4:2:2 10-bit with tier dispatch.
pub fn pg422be10_to_pg422le10(tier: KernelTier, src: &[u8], dst: &mut [u8], w: u32, h: u32) -> Result<()> {
    match tier {
        KernelTier::ForceScalar => scalar::pg422be10_to_pg422le10(src, dst, w, h),
        _ => wide::pg422be10_to_pg422le10(src, dst, w, h),
    }
}

/// Packed-LE to wire 4:2:2 10-bit with tier dispatch.
pub fn pg422le10_to_pg422be10(tier: KernelTier, src: &[u8], dst: &mut [u8], w: u32, h: u32) -> Result<()> {
    match tier {
        KernelTier::ForceScalar => scalar::pg422le10_to_pg422be10(src, dst, w, h),
        _ => wide::pg422le10_to_pg422be10(src, dst, w, h),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemcpyDma;

    #[test]
    fn test_cpu_level_probe_is_stable() {
        assert_eq!(cpu_level(), cpu_level());
    }

    #[test]
    fn test_dispatch_tiers_agree() {
        let (w, h) = (64u32, 3u32);
        let cnt = (w * h / 2) as usize;
        let pg: Vec<u8> = (0..cnt * 5).map(|_| fastrand::u8(..)).collect();

        let mut outs = Vec::new();
        for tier in [KernelTier::ForceScalar, KernelTier::Wide, KernelTier::Auto] {
            let (mut y, mut b, mut r) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
            pg422be10_to_planar10(tier, None, &pg, &mut y, &mut b, &mut r, w, h).unwrap();
            outs.push((y, b, r));
        }
        // DMA tier via an eager engine
        let dma = MemcpyDma::new();
        let mut ctx = DmaStagedCtx::new(4, 320);
        let (mut y, mut b, mut r) = (vec![0u16; cnt * 2], vec![0u16; cnt], vec![0u16; cnt]);
        pg422be10_to_planar10(
            KernelTier::Auto,
            Some((&dma, &mut ctx)),
            &pg,
            &mut y,
            &mut b,
            &mut r,
            w,
            h,
        )
        .unwrap();
        outs.push((y, b, r));

        for pair in outs.windows(2) {
            assert_eq!(pair[0], pair[1], "kernel tiers disagree");
        }
    }
}
