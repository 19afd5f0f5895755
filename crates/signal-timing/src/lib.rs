//! Adaptive Signal Timing
//!
//! Pure green-time allocation: proportional to relative demand, bounded to
//! `[min_green, max_green]`, never starving an approach below `min_green`.

mod calculator;
mod cycle;

pub use calculator::{AdaptiveTimingCalculator, GreenBounds};
pub use cycle::{recommend_cycle_length, timing_efficiency};
