//! Demo node types built on `ngraph_base`, plus the tracing bootstrap used
//! by the `ngdemo` binary.
//!
//! # Pipeline
//!
//! ```text
//!  ┌────────┐ out    left ┌─────┐ right   in ┌──────┐
//!  │ source │────────────▶│ tee │────────────▶│ echo │
//!  │ (hole) │◀────────────│     │◀────────────│      │
//!  └────────┘             └──┬──┘             └──────┘
//!                       copy │
//!                            ▼ in
//!                        ┌──────┐
//!                        │ sink │
//!                        │(hole)│
//!                        └──────┘
//! ```

mod logging;
mod nodes;

pub use logging::{TracingConfig, TracingFormat};
pub use nodes::{Echo, Hole, HoleStats, Tee, register_all};
