//! Scriptable fixtures shared by the crate's tests: a fake API whose
//! command footprints are spelled out in the test instead of being
//! derived from a real driver state.

pub mod cases;
