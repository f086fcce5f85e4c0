//! Raw FFI bindings for the Thorlabs SpectralRadar C SDK.
//!
//! Bindings are generated at build time from the vendor headers when the
//! `spectralradar-sdk` feature is enabled; without it this crate compiles to
//! an empty shell so the workspace builds on machines without the SDK.
//!
//! All items are `unsafe` to use and carry no invariants beyond what the
//! vendor documentation states. The safe layer lives in the `oct_daq` crate.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(unsafe_code)]
#![allow(missing_docs)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
