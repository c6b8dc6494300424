//! Bulk-transfer capture pipeline and SAV/EAV sync decoding for 4-channel video
//! capture hardware.
//!
//! * [capture] keeps a set of reads in flight against a [capture::Transport], hands
//!   completed buffers from a reader thread to a writer thread and accumulates them
//!   into a bounded analysis buffer.
//! * [decode] expands an analysis buffer into 4 bit channels, locates sync markers
//!   and reconstructs video lines and frames.
//!
//! ```no_run
//! use std::fs::File;
//! use vidcap::capture::{CaptureSession, ReaderTransport};
//! use vidcap::config::Config;
//! use vidcap::decode::Decoder;
//!
//! let config = Config::from_path("vidcap.json")?;
//! let transport = ReaderTransport::new(File::open("capture.raw")?);
//! let capture = CaptureSession::new(config.capture, transport).run()?;
//!
//! for frame in Decoder::new(config.decode).decode(&capture.data).frames {
//!     println!("frame {} has {} lines", frame.number, frame.lines.len());
//! }
//! # Ok::<(), vidcap::Error>(())
//! ```
mod error;

pub mod capture;
pub mod config;
pub mod decode;

pub use error::{Error, Result, TransportError};
