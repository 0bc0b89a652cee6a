//! Crafting, rendering and signing of workflow attestations.
//!
//! `tessera-craft` accumulates evidence about a workflow run in a
//! [`state::CraftingState`], persists it between steps through a
//! compare-and-swap [`store::StateStore`], renders it into an in-toto
//! statement under one of two predicate schemas ([`render`]) and signs
//! the canonical statement bytes into a DSSE [`envelope::Envelope`]
//! ([`signer`]).

pub mod canonical;
pub mod envelope;
pub mod error;
pub mod material;
pub mod metadata;
pub mod render;
pub mod signer;
pub mod state;
pub mod statement;
pub mod store;
pub mod vcs;
