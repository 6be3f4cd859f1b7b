mod channel;
mod error;
mod line_buffer;
mod traits;

pub use self::channel::*;
pub use self::error::{Error, InitPhase, Result};
pub use self::line_buffer::{Fill, LineBuffer, LineTooLong};
pub use self::traits::{EpochClock, SystemClock, Transport};
