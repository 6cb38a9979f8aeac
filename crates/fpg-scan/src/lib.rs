// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scan request pipeline: payload parsing, per-request configuration,
//! worker fan-out against the engine, and response-path charset detection.

#![deny(unsafe_code)]

pub mod charset;
pub mod pool;
pub mod resolve;
pub mod wfp;

pub use charset::detect_charset;
pub use pool::{run_scan, ScanOutput};
pub use resolve::{resolve_scan_config, ScanFormFields};
pub use wfp::{parse_wfp, WfpPayload};
