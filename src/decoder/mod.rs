pub mod block;
pub mod demux;
pub mod error;
pub mod jpeg;

pub use block::DecodedBlock;
pub use demux::FrameDemuxer;
pub use error::DemuxError;
