//! # Syllabus Insights
//!
//! Upload course syllabi, browse them, and read AI-generated insights about
//! each one (summary, workload, grading, prerequisites).
//!
//! Insights are expensive to produce, so every `(slug, kind)` pair is computed
//! at most once and kept on disk. Concurrent requests for the same pair share
//! one generator call.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐
//! │   CLI    │   │   HTTP   │
//! │  (syl)   │   │  (axum)  │
//! └────┬─────┘   └────┬─────┘
//!      └───────┬──────┘
//!              ▼
//!        ┌───────────┐      ┌─────────────┐
//!        │  Library  │─────▶│ Insight     │──▶ Generator
//!        └─────┬─────┘      │ Cache       │    (OpenAI / placeholder)
//!              │            └─────────────┘
//!      ┌───────┴───────┐
//!      ▼               ▼
//! ┌──────────┐   ┌───────────┐
//! │ Metadata │   │ Documents │
//! │ index    │   │ uploads/  │
//! └──────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! syl init                                   # write config, create data dirs
//! syl upload cs101.pdf --course-code CS101   # store a syllabus
//! syl insight cs101 workload                 # generate (or read) an insight
//! syl serve                                  # start the web UI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`slug`] | Validated document identifiers |
//! | [`models`] | Document records and insight kinds |
//! | [`persist`] | Atomic file writes |
//! | [`metadata`] | Slug → record index |
//! | [`documents`] | Slug → uploaded bytes |
//! | [`extract`] | Text extraction (PDF, DOCX, PPTX, text) |
//! | [`generator`] | Insight generator abstraction |
//! | [`cache`] | Cache-or-compute with per-key single flight |
//! | [`library`] | Upload, browse, insight, remove |
//! | [`render`] | HTML pages and insight panels |
//! | [`server`] | HTTP server |

pub mod cache;
pub mod config;
pub mod documents;
pub mod error;
pub mod extract;
pub mod generator;
pub mod library;
pub mod metadata;
pub mod models;
pub mod persist;
pub mod render;
pub mod server;
pub mod slug;
