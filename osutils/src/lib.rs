pub mod dependencies;
pub mod path;
pub mod runner;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testutils;
