//! The daemon: a Unix-socket server in front of the indexing pipeline.
//!
//! The daemon keeps the translation-unit cache and both workers in memory
//! and serves short commands over a socket in `.cxref/`:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             cxref daemon                 │
//! │  - parse worker (queue → units)          │
//! │  - visit worker (symbol forest)          │
//! │  - unit cache for direct queries         │
//! │  - file watcher (re-index on change)     │
//! └──────────────────────────────────────────┘
//!            ▲
//!            │ .cxref/cxref.sock
//!            ▼
//! ┌──────────────────────────────────────────┐
//! │             cxref CLI                    │
//! │  - one JSON request per line             │
//! │  - one JSON response per line            │
//! └──────────────────────────────────────────┘
//! ```

pub mod protocol;
pub mod server;

pub use protocol::{Request, Response};
pub use server::{is_daemon_running, send_request, socket_path, start_daemon, Daemon};
