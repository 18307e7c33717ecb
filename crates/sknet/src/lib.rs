#![warn(missing_docs)]
//!# sknet - Selective Kernel Networks for burn
//!
//! ## Notable Components
//!
//! * [`cache`] - weight loading cache.
//! * [`compat`] - compat code, ported or planned for an upcoming release of ``burn``.
//!   * [`compat::activation_wrapper::Activation`] - activation layer abstraction wrapper.
//!   * [`compat::normalization_wrapper::Normalization`] - norm layer abstraction wrapper.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::attention`] - attention layers.
//!     * [`layers::attention::selective_kernel`] - multi-branch selective kernel convolution.
//!     * [`layers::attention::squeeze_excite`] - squeeze-and-excite channel gate.
//!   * [`layers::blocks`] - miscellaneous blocks.
//!     * [`layers::blocks::cna`] - ``Conv2d + Norm + Act`` block.
//!   * [`layers::drop`] - dropout layers.
//!     * [`layers::drop::drop_block`] - 2d drop block / spatial dropout.
//!     * [`layers::drop::drop_path`] - drop path / stochastic depth.
//! * [`models`] - complete model families.
//!   * [`models::sknet`] - the Selective Kernel `ResNet` family.

extern crate core;
/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;

pub mod layers;

pub mod cache;
pub mod models;
pub mod utility;
