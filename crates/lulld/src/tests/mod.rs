//! In-crate test suites for the lull daemon.

pub(crate) mod support;
