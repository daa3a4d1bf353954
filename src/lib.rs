#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! modemd library — the cellular modem control core, split out so it can be
//! exercised by tests independently of the process shell.
//!
//! - `protocol` — wire-level types: PDP contexts, `RegStatus`/`SimCode`,
//!   line classification
//! - `framer` — byte-stream to line framing
//! - `serial` — raw termios serial I/O with a cancellable blocking read
//! - `state` — modem state, command queue, published property snapshot
//! - `response` — solicited-reply dispatch table
//! - `lifecycle` — init sequence, tick assembly, PDP selection
//! - `ppp` — PPP supervision and route-table probing
//! - `engine` — the command-engine thread tying the above together
//! - `settings` — external settings-service boundary client
//! - `bus` — `com.victronenergy.modem` property surface
//! - `config` — ambient configuration loading
//! - `error` — the daemon's error type

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod framer;
pub mod lifecycle;
pub mod ppp;
pub mod protocol;
pub mod response;
pub mod serial;
pub mod settings;
pub mod state;

pub use config::Config;
pub use error::ModemError;
