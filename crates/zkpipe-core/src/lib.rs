//! Core library for the zkpipe proving pipeline.
//!
//! Provides the [`backend::ProvingBackend`] trait that all proving system
//! backends implement, along with the infrastructure around it: a
//! content-addressed [`artifacts::ArtifactStore`], an SRS cache with request
//! coalescing ([`srs::SrsProvider`]), the circuit/key/proving stages, and the
//! resumable [`pipeline::PipelineOrchestrator`].
//!
//! This crate is backend-agnostic: it never substitutes mock data for a
//! failed cryptographic step. The only in-tree backend is
//! [`zkpipe_sim`](https://docs.rs/zkpipe-sim), an explicitly non-cryptographic
//! simulation for tests and local development.

pub mod artifacts;
pub mod backend;
pub mod config;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod prover;
pub mod setup;
pub mod srs;
pub mod state;

#[cfg(test)]
mod testutil;
