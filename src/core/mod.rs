pub mod frame_buffer;
pub mod player;
pub mod session;
pub mod sink;
pub mod source;

pub use session::Session;
