//! Command implementations: migrate, rollback, status, reset, refresh,
//! fresh, seed, truncate, wipe, check, make.

pub mod check;
pub mod fresh;
pub mod make;
pub mod migrate;
pub mod refresh;
pub mod reset;
pub mod rollback;
pub mod seed;
pub mod status;
pub mod truncate;
pub mod wipe;
