//! Incremental LSP service (C9): session state, debounced re-analysis,
//! per-repo result caching, and diagnostic publication for an editor
//! integration. The JSON-RPC framing itself is an external collaborator
//! (§1) — [`transport`] supplies a minimal stdio implementation of it so the
//! CLI's `lsp` subcommand has something to run, but [`service::LspService`]
//! only ever sees parsed `serde_json::Value` messages.

pub mod analyze;
pub mod debounce;
pub mod diagnostics;
pub mod ratelimit;
pub mod service;
pub mod transport;

pub use service::{LspService, OutboundConn};
