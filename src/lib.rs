//! dlcforge - DLC download and install manager
//!
//! Downloads packaged DLC archives, installs them into a game directory,
//! verifies installed content against a hash manifest, and patches the
//! companion launcher via a DLL swap.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod crash;
pub mod events;
pub mod fsutil;
pub mod hash;
pub mod installer;
pub mod reconcile;
pub mod transport;
pub mod unlocker;
pub mod verify;

#[cfg(test)]
pub(crate) mod testutil;
