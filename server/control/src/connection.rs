use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, reference-counted-by-convention handle to one TLS stream. The
/// gateway allocates one per accepted connection and registers it with
/// [`crate::manager::Manager`] immediately after the TLS handshake; a User
/// holding a handle never observes a dangling connection because the
/// gateway only drops its sender half once the connection's read/write
/// tasks have both exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl ConnectionHandle {
    /// Allocate a fresh handle. Monotonic, process-wide, never reused.
    pub fn allocate() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_distinct() {
        let a = ConnectionHandle::allocate();
        let b = ConnectionHandle::allocate();
        assert_ne!(a, b);
    }
}
