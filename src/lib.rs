//! Live log following with incremental, cancellable search.
//!
//! A [`tail`] thread feeds lines into a [`view::ViewCoordinator`], which keeps
//! a bounded [`buffer::LineBuffer`] and a [`search::SearchEngine`] in step so
//! match indices stay valid while old lines are evicted.

pub mod buffer;
pub mod config;
pub mod debounce;
pub mod input;
pub mod log_parser;
pub mod search;
pub mod tail;
pub mod theme;
pub mod view;
