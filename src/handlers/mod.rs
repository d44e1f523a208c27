// src/handlers/mod.rs

pub mod admin;
pub mod attempt;
pub mod auth;
pub mod feedback;
pub mod grading;
pub mod profile;
pub mod quiz;
