//! Route handlers

pub mod live;
pub mod locations;
pub mod overrides;
pub mod samples;
