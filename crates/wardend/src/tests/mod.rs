//! Test suites for the supervisor.

pub(crate) mod support;
