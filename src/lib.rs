//! Chathub - Realtime chat and calling backend
//!
//! A single-process coordination layer for a multi-user chat product:
//! authenticated WebSocket connections, conversation membership and message
//! fan-out, presence and typing, streamed AI responses, and two-party WebRTC
//! call signaling relay.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
