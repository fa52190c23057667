//! A small simulated network of workers that swap timestamped messages
//! through a central router over loopback TCP.
//!
//! Each worker plays an ordered list of [`peer::Instruction`]s out through
//! its [`peer::SerialDispatcher`], waiting out every instruction's delay
//! before sending it to the [`router::Router`], which relays it to the
//! target. Every send and receive moves the peer's [`peer::LogicalClock`]
//! forward. When a worker runs out of instructions it tells the router it is
//! done; once every worker has, the router tells them all to close.
//!
//! One message travels per TCP connection in the frame format described in
//! [`net::wire`]. Delivery is best effort and one-way: failures are logged
//! where they happen and nothing is retried.

pub mod config;
pub mod net;
pub mod peer;
pub mod router;
pub mod script;
pub mod sim;

pub use config::SimulationConfig;
pub use net::{PeerId, WireMessage};
pub use sim::{Simulation, SimulationReport, Topology};
