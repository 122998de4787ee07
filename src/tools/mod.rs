//! Typed invocations for every external tool.
//!
//! Each struct implements `ToolInvocation` and maps its fields to the exact
//! argv, environment and stdin the corresponding program expects.

pub mod disk;
pub mod repo;
pub mod system;
