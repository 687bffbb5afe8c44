pub mod errors;
pub mod config;
pub mod models;
pub mod store;
pub mod harness;
pub mod container;
pub mod toolchain;
pub mod classifier;
pub mod refine;
pub mod controller;
pub mod llm;
pub mod prompts;
pub mod audit;
pub mod reporting;
pub mod batch;
pub mod cli;
pub mod utils;
