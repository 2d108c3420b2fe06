//! Projection of extension actions into the host command surface.

pub mod bridge;
