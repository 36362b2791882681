//! # docchat
//!
//! Chat with your documents: upload PDF, Excel, Word and plain-text files,
//! build a local similarity index over their content, and ask questions
//! answered by a hosted language model from the retrieved passages only.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │ Uploads  │──▶│ Extract  │──▶│  Chunk   │──▶│ Embed + Index │
//! │ pdf/xlsx │   │ per kind │   │ 1000/200 │   │   (SQLite)   │
//! └──────────┘   └──────────┘   └──────────┘   └──────┬───────┘
//!                                                     │ top-3
//!                      ┌──────────┐   ┌──────────┐    │
//!                      │ CLI/HTTP │◀──│   LLM    │◀───┘
//!                      └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GROQ_API_KEY=gsk_...
//! docchat process report.pdf sales.xlsx
//! docchat ask "What is the average Unit_Price?"
//! docchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and pinned model constants |
//! | [`models`] | Core data types |
//! | [`extract`] | Per-format text extraction |
//! | [`ingest`] | Upload staging and document loading |
//! | [`chunk`] | Recursive text splitting |
//! | [`embedding`] | Embedding capability |
//! | [`index`] | Persisted similarity index |
//! | [`indexer`] | Building the index from documents |
//! | [`llm`] | Chat-completion capability |
//! | [`rag`] | Retrieval and answer generation |
//! | [`session`] | Chat transcripts |
//! | [`server`] | HTTP server |
//! | [`db`] | Index database connection |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod indexer;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;
pub mod session;
