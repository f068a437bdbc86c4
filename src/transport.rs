//! The Noise/TCP transport and stream multiplexer are external collaborators
//! (spec.md §1); this crate only depends on the narrow interface it needs:
//! "dial a peer on a protocol, get a bidirectional stream back."

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::protocol::PeerId;

/// A bidirectional byte stream, satisfied by a real multiplexed transport
/// stream in production and an in-memory duplex pipe in tests.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new stream to `peer` speaking `protocol`
    /// (`/kiyeovo/1.0.0/chat` or `/kiyeovo/1.0.0/file-transfer`).
    async fn dial(&self, peer: PeerId, protocol: &str) -> Result<BoxedStream>;
}
