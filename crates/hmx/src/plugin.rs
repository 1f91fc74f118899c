// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ST 2110-22 codec plug-in contract and registry.
//!
//! The core transports codestreams; compression itself is a plug-in
//! concern. A plug-in registers under a codec name and device kind and
//! must bound its own worker threads; encode/decode are called from
//! plug-in-owned threads, never from the lcore path.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;

/// Device kind a plug-in runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginDevice {
    Auto,
    Cpu,
    Gpu,
    Fpga,
}

/// Raw frame handed to an encoder / produced by a decoder.
pub struct RawFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

/// One codec implementation.
pub trait CodecPlugin: Send + Sync {
    /// Codec name ("jpegxs", "h264", ...).
    fn name(&self) -> &str;
    fn device(&self) -> PluginDevice;
    /// Worst-case codestream bytes for a frame of the given size.
    fn max_codestream_size(&self, width: u32, height: u32) -> usize;
    /// Encode one frame into `out`; returns the codestream length.
    fn encode(&self, frame: &RawFrame<'_>, out: &mut [u8]) -> Result<usize>;
    /// Decode one codestream into `out`; returns the frame bytes.
    fn decode(&self, codestream: &[u8], out: &mut [u8]) -> Result<usize>;
}

/// Process-wide plug-in registry.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<(String, PluginDevice), Arc<dyn CodecPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: Arc<dyn CodecPlugin>) {
        let key = (plugin.name().to_string(), plugin.device());
        log::info!("[plugin] registered codec {} on {:?}", key.0, key.1);
        self.plugins.insert(key, plugin);
    }

    /// Look up a codec; `Auto` falls back through Gpu, Fpga, Cpu.
    pub fn lookup(&self, name: &str, device: PluginDevice) -> Result<Arc<dyn CodecPlugin>> {
        let candidates: &[PluginDevice] = match device {
            PluginDevice::Auto => &[PluginDevice::Gpu, PluginDevice::Fpga, PluginDevice::Cpu],
            PluginDevice::Cpu => &[PluginDevice::Cpu],
            PluginDevice::Gpu => &[PluginDevice::Gpu],
            PluginDevice::Fpga => &[PluginDevice::Fpga],
        };
        for dev in candidates {
            if let Some(p) = self.plugins.get(&(name.to_string(), *dev)) {
                return Ok(Arc::clone(p.value()));
            }
        }
        Err(Error::PluginNotAvailable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCodec(PluginDevice);

    impl CodecPlugin for NullCodec {
        fn name(&self) -> &str {
            "null"
        }

        fn device(&self) -> PluginDevice {
            self.0
        }

        fn max_codestream_size(&self, width: u32, height: u32) -> usize {
            (width * height) as usize
        }

        fn encode(&self, frame: &RawFrame<'_>, out: &mut [u8]) -> Result<usize> {
            let n = frame.data.len().min(out.len());
            out[..n].copy_from_slice(&frame.data[..n]);
            Ok(n)
        }

        fn decode(&self, codestream: &[u8], out: &mut [u8]) -> Result<usize> {
            let n = codestream.len().min(out.len());
            out[..n].copy_from_slice(&codestream[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_lookup_exact_device() {
        let reg = PluginRegistry::new();
        reg.register(Arc::new(NullCodec(PluginDevice::Cpu)));
        assert!(reg.lookup("null", PluginDevice::Cpu).is_ok());
        assert!(reg.lookup("null", PluginDevice::Gpu).is_err());
        assert!(matches!(
            reg.lookup("jpegxs", PluginDevice::Cpu),
            Err(Error::PluginNotAvailable(_))
        ));
    }

    #[test]
    fn test_auto_prefers_accelerators() {
        let reg = PluginRegistry::new();
        reg.register(Arc::new(NullCodec(PluginDevice::Cpu)));
        let found = reg.lookup("null", PluginDevice::Auto).unwrap();
        assert_eq!(found.device(), PluginDevice::Cpu);
        reg.register(Arc::new(NullCodec(PluginDevice::Gpu)));
        let found = reg.lookup("null", PluginDevice::Auto).unwrap();
        assert_eq!(found.device(), PluginDevice::Gpu, "gpu preferred in auto");
    }
}
