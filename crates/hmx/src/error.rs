// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for hmx sessions and kernels.
//!
//! One public [`Error`] enum covers every failure surface, grouped by
//! category. The lcore datapath never returns these; packet-level problems
//! are counted in [`crate::stats`] and the packet is dropped. `Error` is for
//! the application-facing API: session creation, buffer/event calls, and
//! the conversion kernels' argument validation.
//!
//! For C-shaped callers every variant also maps onto a negative POSIX errno
//! via [`Error::errno`].

/// Errors returned by hmx operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration errors (returned at session create)
    // ========================================================================
    /// Video/audio format not supported by the transport.
    InvalidFormat(String),
    /// Resolution invalid for the configured format (zero, odd where even
    /// required, or exceeding the transport maximum).
    InvalidDimensions(u32, u32),
    /// Frame rate is not one of the standard ST 2110 rates.
    InvalidFps(String),
    /// Port count must be 1 (single path) or 2 (ST 2022-7 redundant pair).
    InvalidPortCount(usize),
    /// Frame-buffer count out of range for the slot ring.
    InvalidBufferCount(u16),
    /// A ring size that must be a power of two is not.
    RingSizeNotPowerOfTwo(usize),
    /// Requested ST 2110-22 codec plug-in is not registered.
    PluginNotAvailable(String),
    /// Header-split was requested but the packet I/O backend cannot deliver
    /// it for the configured packing.
    HeaderSplitUnsupported,

    // ========================================================================
    // Session / runtime errors
    // ========================================================================
    /// Session is stopped; blocking calls return this until `start()`.
    Again,
    /// Blocking call reached its timeout with no buffer/event available.
    Timeout,
    /// Session handle does not refer to a live session.
    SessionNotFound,
    /// Operation not valid for the session's direction or media type.
    WrongSessionType,
    /// The buffer handed to `buffer_put` was not obtained from this session.
    ForeignBuffer,
    /// Hardware/transmit queue hang beyond the recovery budget.
    QueueHang,

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(std::io::Error),
    /// Failed to bind or configure a socket.
    BindFailed(String),
    /// Failed to join the multicast group for an RX flow.
    MulticastJoinFailed(String),

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// Out of memory during session or buffer allocation.
    OutOfMemory,
    /// External frame buffer was not registered for DMA.
    MemNotRegistered,

    // ========================================================================
    // Kernel errors
    // ========================================================================
    /// Conversion arguments invalid (dimension/PG-count constraint).
    InvalidConversion(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            Error::InvalidDimensions(w, h) => write!(f, "Invalid dimensions: {}x{}", w, h),
            Error::InvalidFps(msg) => write!(f, "Invalid fps: {}", msg),
            Error::InvalidPortCount(n) => {
                write!(f, "Invalid port count: {} (must be 1 or 2)", n)
            }
            Error::InvalidBufferCount(n) => write!(f, "Invalid buffer count: {}", n),
            Error::RingSizeNotPowerOfTwo(n) => {
                write!(f, "Ring size {} is not a power of two", n)
            }
            Error::PluginNotAvailable(name) => write!(f, "Codec plug-in not available: {}", name),
            Error::HeaderSplitUnsupported => {
                write!(f, "Header-split not supported for this packing/backend")
            }
            Error::Again => write!(f, "Session stopped, try again after start"),
            Error::Timeout => write!(f, "Timed out"),
            Error::SessionNotFound => write!(f, "Session not found"),
            Error::WrongSessionType => write!(f, "Operation not valid for this session type"),
            Error::ForeignBuffer => write!(f, "Buffer does not belong to this session"),
            Error::QueueHang => write!(f, "Transmit queue hang beyond recovery budget"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::MulticastJoinFailed(msg) => write!(f, "Multicast join failed: {}", msg),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::MemNotRegistered => write!(f, "Buffer memory not registered for DMA"),
            Error::InvalidConversion(msg) => write!(f, "Invalid conversion: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl Error {
    /// Map onto the negative POSIX errno space.
    ///
    /// Every configuration error is `-EINVAL`-shaped unless a closer errno
    /// exists. Success is 0 by convention at the call sites; this method is
    /// only defined on the failure half.
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidFormat(_)
            | Error::InvalidDimensions(_, _)
            | Error::InvalidFps(_)
            | Error::InvalidPortCount(_)
            | Error::InvalidBufferCount(_)
            | Error::RingSizeNotPowerOfTwo(_)
            | Error::HeaderSplitUnsupported
            | Error::WrongSessionType
            | Error::ForeignBuffer
            | Error::InvalidConversion(_) => -libc::EINVAL,
            Error::PluginNotAvailable(_) | Error::SessionNotFound => -libc::ENOENT,
            Error::Again => -libc::EAGAIN,
            Error::Timeout => -libc::ETIMEDOUT,
            Error::QueueHang | Error::BindFailed(_) | Error::MulticastJoinFailed(_) => -libc::EIO,
            Error::Io(e) => e.raw_os_error().map(|v| -v).unwrap_or(-libc::EIO),
            Error::OutOfMemory => -libc::ENOMEM,
            Error::MemNotRegistered => -libc::EFAULT,
        }
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
