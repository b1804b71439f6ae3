//! Position lifecycle on a leveraged OTC broker.
//!
//! Steps, in order:
//! - Resolve the market by search term or epic
//! - Size the position from available funds and margin factor
//! - Open a market order and wait for it to be listed
//! - Attach a trailing stop scaled to the fill level
//! - Verify what the broker recorded, closing the position on mismatch

mod draft;
mod lifecycle;
mod opener;
mod resolver;
mod risk;
mod sizer;
mod verifier;

pub use draft::DraftSpecification;
pub use lifecycle::{MarketSource, OpenPosition, PositionLifecycle, PositionState};
pub use opener::{ConfirmedPosition, PollPolicy, PositionOpener};
pub use resolver::MarketResolver;
pub use risk::{trailing_stop_request, RiskAdjuster};
pub use sizer::{available_funds, compute_size};
pub use verifier::{compare, SpecificationField, SpecificationVerifier, VerificationResult};
