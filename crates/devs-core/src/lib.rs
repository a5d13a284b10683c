//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Hierarchical composition and event routing kernel."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
//! Hierarchical model composition and event routing for Parallel DEVS.
//!
//! Models form a tree. Atomic models hold user state and react to values on
//! their input ports; coupled models own children and route values between
//! them along three kinds of couplings. A value sent on an output port is
//! delivered synchronously through every matching coupling, across any
//! number of hierarchy levels, before `send` returns.
//!
//! ```
//! use std::sync::Arc;
//!
//! use devs_core::{CoupledModel, DeclaredState, ManualClock, OutputPort, SimContext, SimTime};
//!
//! struct Echo {
//!     out: OutputPort<u32>,
//! }
//!
//! impl DeclaredState for Echo {}
//!
//! let clock = Arc::new(ManualClock::new(SimTime::new(5.0)));
//! let ctx = SimContext::new(clock);
//! let (root, input) = CoupledModel::build("root", ctx, |b| {
//!     let input = b.input_port::<u32>("in");
//!     let output = b.output_port::<u32>("out");
//!     let mut echo_in = None;
//!     let echo = b.atomic("echo", |ports| {
//!         echo_in = Some(ports.input("in", |s: &mut Echo, v: u32, _| {
//!             s.out.send(v * 2)?;
//!             Ok(())
//!         }));
//!         Echo { out: ports.output("out") }
//!     })?;
//!     let echo_in = echo_in.expect("input declared");
//!     b.external_input(&input, &echo_in)?;
//!     b.external_output(&echo.with_state(|s| s.out.clone()), &output)?;
//!     output.attach_drain(|v, t| assert_eq!((v, t), (42, SimTime::new(5.0)))).ok();
//!     Ok(input)
//! })?;
//! input.receive(21, SimTime::new(5.0))?;
//! assert_eq!(root.children().len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod atomic;
pub mod context;
pub mod coupled;
pub mod coupling;
pub mod error;
pub mod metrics;
pub mod model;
pub mod port;
pub mod state;

pub use atomic::{AtomicModel, PortFactory};
pub use context::{ErrorSink, SimContext, SimContextBuilder, TracingSink};
pub use coupled::{CoupledBuilder, CoupledModel};
pub use coupling::{Coupling, CouplingKind, CouplingSummary};
pub use devs_common::{ManualClock, SimTime, TimeSource};
pub use error::{BoxError, DeliveryError, StateReadError, TransferError, WiringError};
pub use metrics::RoutingMetrics;
pub use model::{Model, ModelId, ModelIdentity, ModelKind};
pub use port::{InputPort, OutputPort, Payload, PortId};
pub use state::{
    DeclaredState, ObserverId, StateBuffer, StateObserver, StateReader, StateReport, StateUpdate,
    StateVariable,
};
