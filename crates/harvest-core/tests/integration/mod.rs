pub mod common;
mod pipeline_tests;
mod resume_tests;
