//! Frame handling: descriptor classification, 802.11 views, copy pool.

pub mod descriptor;
pub mod dot11;
pub mod pool;

pub use descriptor::{classify, ClassifiedFrame, DescriptorImage, PacketType};
pub use dot11::MacHeader;
pub use pool::{CopyError, FramePool, PooledFrame, POOL_BUFFERS, POOL_BUFFER_LEN};
