//! Centralized constants for the mcs-sync project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod labels;
pub mod paths;
pub mod registry;
pub mod sync;
