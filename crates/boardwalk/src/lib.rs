//! Boardwalk: the server-side synchronization core of a component-based web
//! UI runtime. Server-held connector trees are diffed and streamed to the
//! client as state batches; client-originated variable changes and RPC
//! invocations dispatch back into connector logic, all under one session
//! lock.

pub mod connector;
pub mod keymap;
pub mod request;
pub mod rpc;
pub mod session;
pub mod settings;
pub mod state;
pub mod sync;
pub mod tracker;
pub mod ui;
pub mod vars;
