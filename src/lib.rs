//! Warden: a host enforcement agent.
//!
//! Keeps a machine in a policy-compliant state on a fixed cadence: protected
//! processes must stay alive and unsuspended, forbidden processes are
//! terminated, and local accounts not on the authorized list are removed. A
//! slower trigger refreshes the forbidden list from a remote URL. Losing a
//! protected process or the network past a grace period forces a reboot.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod enforcement;
pub mod host;
pub mod logging;
pub mod policy;
pub mod power;
pub mod refresher;
pub mod scheduler;
pub mod service;
pub mod suspend;
