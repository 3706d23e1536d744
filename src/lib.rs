// src/lib.rs
//! `vibeforge` — a multi-agent simulation orchestration runtime.
//!
//! The core covered by this crate: the tick engine ([`tick_engine`]), the
//! graph-gated message bus ([`message_bus`], [`graph`]), the
//! pending-dispatch/response matching layer with heartbeated remote-agent
//! connections ([`connection_manager`], [`duplex`]), the append-only
//! per-session event log ([`event_log`], [`event`]), and the session state
//! machine that gates configuration versus execution ([`state_machine`],
//! [`session`]). [`controller`] and [`coordinator`] are the two thin
//! facades that wrap these pieces for callers: the former around the tick
//! loop, the latter around the pre-simulation questionnaire/build-spec/
//! concept/plan pipeline.
//!
//! Concrete LLM provider adapters, the HTTP control-plane router, and the
//! file-I/O build/test verifiers are external collaborators; this crate
//! only defines the abstract [`llm_client::LlmClient`] capability they
//! plug into.

pub mod config;
pub mod connection_manager;
pub mod controller;
pub mod coordinator;
pub mod duplex;
pub mod errors;
pub mod event;
pub mod event_log;
pub mod graph;
pub mod llm_client;
pub mod llm_response;
pub mod message_bus;
pub mod session;
pub mod state_machine;
pub mod tick_engine;

#[cfg(feature = "server")]
pub mod ws_server;
