// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! HTTP front-end for the autoupdate engine.

pub mod archive;
pub mod config;
pub mod handlers;
