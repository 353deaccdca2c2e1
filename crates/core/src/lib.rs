pub mod booking;
pub mod cancel;
pub mod config;
pub mod document;
pub mod ids;
pub mod metrics;
pub mod pipeline;
pub mod receipt;
pub mod recognizer;
pub mod retry;
pub mod run;
pub mod schedule;
pub mod service;
pub mod session;
pub mod site;
pub mod stage;
pub mod testing;
pub mod transport;

pub use booking::{BookingOutcome, BookingPipeline, SelectionMode, TripConfig, TripSelection};
pub use cancel::{run_batch, BatchReport, CancelConfig, CancelOutcome, CancelPipeline, CancellationTarget};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, LogFormat,
    SanitizedConfig,
};
pub use pipeline::{PipelineError, PipelineState};
pub use receipt::Receipt;
pub use recognizer::{create_solver, ChallengeSolver, RecognizerConfig};
pub use run::{RunContext, RunRegistry, RunSnapshot, RunStatus};
pub use schedule::{utc_offset, wait_until, StartAt, WaitInterrupted};
pub use service::{lookup_service, ServiceEntry, ServiceKind, SERVICES};
pub use site::SiteConfig;
pub use transport::{Connector, ReqwestConnector};
