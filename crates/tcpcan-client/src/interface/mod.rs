//! CAN interface abstraction
//!
//! The forwarder talks to the physical bus through [`CanInterface`], so the
//! same code runs against SocketCAN on Linux and the in-process mock in
//! tests.

mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
mod socketcan;

pub use mock::MockCanInterface;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use self::socketcan::SocketCanInterface;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tcpcan_core::{CanFilter, CanMessage};

use crate::config::InterfaceKind;
use crate::error::ClientError;

/// A local CAN bus the client reads from and writes to
#[async_trait]
pub trait CanInterface: Send + Sync {
    /// Channel name, e.g. "can0"
    fn name(&self) -> &str;

    /// Wait up to `timeout` for the next frame
    ///
    /// Returns `Ok(None)` on timeout.
    async fn recv(&self, timeout: Duration) -> Result<Option<CanMessage>, ClientError>;

    /// Write one frame to the bus
    async fn send(&self, msg: &CanMessage) -> Result<(), ClientError>;
}

/// Open the interface named by `channel`
///
/// SocketCAN installs `filters` in the kernel. The mock ignores them; the
/// forwarder matches every frame against the same list either way.
pub fn create_interface(
    kind: InterfaceKind,
    channel: &str,
    filters: &[CanFilter],
) -> Result<Arc<dyn CanInterface>, ClientError> {
    match kind {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        InterfaceKind::SocketCan => Ok(Arc::new(SocketCanInterface::open(channel, filters)?)),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        InterfaceKind::SocketCan => Err(ClientError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        InterfaceKind::Mock => Ok(Arc::new(MockCanInterface::new(channel))),
    }
}
