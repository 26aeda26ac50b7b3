//! Command implementations for the flowcall CLI.
//!
//! Each submodule implements one subcommand. Commands share the [`command::Command`]
//! trait, which takes the full command line so runs can record how they were invoked.
//!
//! # Command Categories
//!
//! ## Basecalling
//! - [`run`] - Basecall a raw wells file into FASTQ read groups
//!
//! ## Utilities
//! - [`simulate`] - Generate a synthetic chip with known ground truth

#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::similar_names,
    clippy::struct_excessive_bools,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self
)]

pub mod command;
pub mod common;
pub mod run;
pub mod simulate;
