pub mod bar_id;
pub mod error;
pub mod math;
pub mod ring;
pub mod types;

pub use bar_id::*;
pub use error::*;
pub use ring::RingBuffer;
pub use types::*;
