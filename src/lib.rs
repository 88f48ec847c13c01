// This file makes the crate a library and declares modules for use
// by the binary (main.rs) and integration tests.

pub mod settings;
pub mod updater;
