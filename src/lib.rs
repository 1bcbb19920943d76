//! This crate provides a `no-std` runtime-configurable framing dissector for
//! raw serial byte streams.
//!
//! Packet framing (preamble, header, length field, payload, checksum,
//! padding) is described entirely by a [`Settings`] value supplied at session
//! start, so proprietary protocols can be picked apart without writing a
//! bespoke parser per format. The host feeds one timestamped [`ByteEvent`] at
//! a time and receives batches of [`Annotation`]s describing the reconstructed
//! packet fields.
//!
//! # Usage
//! ```rust
//! use streamframe::{ByteEvent, Dissector, Settings};
//!
//! let mut settings = Settings::default();
//! settings.packet_starttime = 1.0; // ms of idle before a packet may start
//! settings.header_length = 1;
//! settings.headers[0].active = true;
//! settings.headers[0].value_high = "A5".into();
//! settings.length_length = 1;
//! settings.length_mask = "FF".into();
//!
//! let config = settings.resolve().expect("valid configuration");
//! let mut dissector = Dissector::new(config);
//!
//! let stream = [0xA5, 0x04, 0x11, 0x22];
//! let mut t = 0.0;
//! for (i, &byte) in stream.iter().enumerate() {
//!     let gap = if i == 0 { 0.5 } else { 0.0 };
//!     let annotations = dissector.push(ByteEvent { byte, start: t, end: t + 1e-5, gap });
//!     for a in &annotations {
//!         // e.g. "H: a5", "P-START", "L: 4", "D: 11", "P-END"
//!         let _ = a.to_string();
//!     }
//!     t += 1e-5;
//! }
//! ```

#![no_std]

extern crate alloc;

mod config;
pub use self::config::*;

mod crc;
pub use self::crc::*;

mod dissector;
pub use self::dissector::*;

mod header;

mod output;
pub use self::output::*;

/// Number of header candidates matched in parallel.
pub const HEADER_SLOTS: usize = 4;

/// Maximum header length in bytes; also the depth of the flexible-mode
/// search window.
pub const HEADER_MAX_LEN: usize = 8;
