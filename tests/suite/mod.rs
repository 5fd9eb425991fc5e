//! Integration test suite modules

mod bootstrap;
mod scene;
