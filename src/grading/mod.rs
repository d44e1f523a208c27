// src/grading/mod.rs

//! Grading engine: synchronous answer grading, the code sandbox and the
//! background coordinator that feeds code answers through it.

pub mod coordinator;
pub mod grader;
pub mod sandbox;
