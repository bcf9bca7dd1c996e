//! Domain types and pure parsing/classification logic for the invoice
//! processing pipeline. Nothing in this crate performs I/O.

pub mod models;
pub mod parsing;
pub mod validation;
