pub mod streamer;

pub use streamer::{Link, LinkOpener, SerialLinkOpener, SerialStreamer};
