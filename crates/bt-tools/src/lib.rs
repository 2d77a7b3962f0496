//! Diagnostic primitives for behavior tree execution.
//!
//! Components receive a [`TraceSink`] at construction and report search and
//! task lifecycle events through it. Nothing here is global.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod trace;

pub use trace::{NullTraceSink, SharedTraceSink, TraceEvent, TraceLog, TraceSink, VecTraceSink};
