//! Real-time runtime for the band-power pipeline
//!
//! Wires the processing stages to a fixed-rate scheduler, connection
//! lifecycle events, listeners and a sample ingress thread.

pub mod channel;
pub mod config;
pub mod gate;
pub mod ingress;
pub mod listener;
pub mod pipeline;
pub mod scheduler;
pub mod stats;

pub use channel::{bounded, BoundedReceiver, BoundedSender, OverflowPolicy, SendOutcome};
pub use config::ConfigHandle;
pub use gate::StartGate;
pub use ingress::{IngressSender, SampleIngress};
pub use listener::{ChannelListener, ListenerId, ListenerRegistry, PipelineEvent, PipelineListener};
pub use pipeline::{ConnectionState, SpectraPipeline};
pub use scheduler::{CycleJob, CycleOutcome, CycleScheduler, WARM_UP_PERIODS};
pub use stats::{CycleStats, StatsRecorder};
