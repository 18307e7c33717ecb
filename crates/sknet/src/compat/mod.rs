//! # Compat Wrappers
//!
//! Abstraction wrappers over ``burn::nn`` layer families which do not
//! yet ship a common config/module pair upstream.

pub mod activation_wrapper;
pub mod normalization_wrapper;
