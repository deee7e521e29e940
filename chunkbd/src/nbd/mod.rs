//! NBD front end
//!
//! Serves the block device over the Network Block Device protocol
//! (fixed newstyle negotiation, simple replies). One device handle is
//! opened per client connection and closed when the client goes away.
//!
//! Submodules:
//! - `proto`: wire constants and message codecs
//! - `server`: listener, option haggling and the transmission loop
pub mod proto;
pub mod server;

pub use server::NbdServer;
