//! Transport module - socket setup.
//!
//! Only TCP is supported. The connection owns the stream once it is open
//! and splits it into independent read and write halves.

mod tcp;

pub use tcp::connect;
