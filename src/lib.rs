//! Chalkline - operations reporting for school campuses.
//!
//! # Overview
//!
//! Chalkline lets on-site staff log operational incidents (maintenance,
//! security, cleaning, IT, medical) from a web dashboard or straight from
//! WhatsApp, and pushes every change to connected dashboards in real time.
//!
//! Free-text reports are turned into structured records by an AI provider
//! chain (OpenAI, Anthropic, Gemini) with a rule-based parser as the last
//! resort, so reporting keeps working with no provider configured at all.
//!
//! # Modules
//!
//! - [`model`]: Domain types, activity lifecycle rules, request bodies
//! - [`storage`]: SQLite storage layer
//! - [`api`]: HTTP API handlers and the router
//! - [`events`] / [`broadcast`]: Live event types and the SSE fan-out
//! - [`providers`]: AI provider clients, selection and fallback
//! - [`notify`]: Outbound WhatsApp notifications via Twilio
//! - [`webhook`]: Inbound Twilio WhatsApp webhook
//! - [`error`]: API error taxonomy and response mapping

pub mod api;
pub mod broadcast;
pub mod error;
pub mod events;
pub mod model;
pub mod notify;
pub mod providers;
pub mod storage;
pub mod webhook;
