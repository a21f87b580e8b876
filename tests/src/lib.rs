//! Integration tests for the SportLink client core.

pub mod support;

#[cfg(test)]
mod unit;
