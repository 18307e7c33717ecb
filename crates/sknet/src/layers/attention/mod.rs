//! # Attention Layers

pub mod selective_kernel;
pub mod squeeze_excite;
