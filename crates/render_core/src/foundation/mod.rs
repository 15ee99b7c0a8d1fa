//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the crate:
//! - Fixed-size rings of per-slot state
//! - Logging utilities

pub mod collections;
pub mod logging;
