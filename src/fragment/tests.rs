//! Unit tests for fragmentation and header handling.
//!
//! Tests are split into focused submodules to keep each file short and easy
//! to navigate.

mod header_tests;
