//! SVF interpreter and JTAG TAP driver for kernel-device and MCTP-attached
//! targets.
//!
//! The library never installs a `tracing` subscriber itself; the binaries
//! in `src/bin` do that, following the usual convention that libraries
//! emit events and applications decide how to render them.

pub mod bitbuf;
pub mod error;
pub mod frontend;
pub mod svf;
pub mod tap;
pub mod transport;

pub use error::{Error, Result};
pub use frontend::JtagHandle;
pub use svf::SvfInterpreter;
pub use tap::TapState;
pub use transport::{JtagConfig, JtagTransport, TransportMode};
