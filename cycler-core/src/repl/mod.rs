//! Host-facing command surface.
//!
//! The wire framing that carries these lines is an external collaborator;
//! this module only turns one already-delivered line into a structured
//! command and renders the status fields the host serializes back.

pub mod grammar;
pub mod status;
