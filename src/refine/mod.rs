//! Refinement Proposer: turns a non-green verdict into the next plan version.

pub mod patch;
pub mod proposer;
pub mod synthesis;
pub mod validation;

pub use patch::{parse_patch, PatchRegion, PlanPatch};
pub use proposer::{Proposal, ProposalFailure, ProposalRequest, ProposerSettings, RefinementProposer};
pub use synthesis::{LlmSynthesizer, SynthesisCollaborator, SynthesisRequest, UnavailableSynthesizer};
pub use validation::{validate_candidate, ValidationContext};
