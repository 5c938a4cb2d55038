//! Interactive relationship-graph engine for FHIR resources.
//!
//! The engine owns a discovered graph of resources, keeps a force-directed
//! layout alive, derives the visible subset from filters and hands the host a
//! retained draw scene. All I/O goes through the request lifecycle; the GUI
//! layer only reads state and sends intents.

pub mod graph_utils;
pub mod net;
pub mod persistence;
pub mod session;
pub mod viz;
