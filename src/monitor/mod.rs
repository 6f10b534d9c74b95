//! Network link monitoring
//!
//! Watches interface link state through pluggable detection strategies and
//! publishes connect/disconnect events to registered handlers.

pub mod detect;
pub mod link;
pub mod netinfo;

pub use detect::{DetectionStrategy, HelperDetector, PollDetector, PushDetector};
pub use link::{
    install_auto_run, EventHandler, HandlerId, InterfaceStatus, LinkState, LinkStateMonitor,
    NetworkEvent, NetworkEventKind,
};
pub use netinfo::{AddressSnapshot, InterfaceState};
