//! Hardware-independent telemetry core for the vitals-rs wearable data node
//!
//! This crate contains the platform-agnostic on-device pipeline: raw sample
//! and page codecs, the page ring buffer shared between the acquisition and
//! consumer contexts, window consolidation with step detection, the
//! append-only record log, and the command-driven streaming session that
//! exposes the log over a wireless characteristic pair.
//!
//! It is `#![no_std]` so it compiles on both embedded targets (ESP32-class
//! parts) and desktop hosts (for tests). Hardware is reached only through
//! traits: sensors via [`acquire::SampleSource`], the flash filesystem via
//! [`storage::LogVolume`], and the radio link via [`link::session::FrameSink`].

#![no_std]

#[cfg(test)]
extern crate std;

pub mod acquire;
pub mod config;
pub mod consolidate;
pub mod link;
pub mod page;
pub mod pipeline;
pub mod ring;
pub mod sample;
pub mod storage;
