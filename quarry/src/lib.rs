//! A teaching relational query engine.
//!
//! Queries go through [`parser`], [`planner`] and [`optimizer`] before the
//! [`executor`] pulls tuples out of relation files stored with `cobble`.
pub mod catalog;
pub mod config;
pub mod errors;
pub mod executor;
pub mod index;
pub mod interpreter;
pub mod optimizer;
pub mod parser;
pub mod planner;
pub mod types;
pub mod union_find;
