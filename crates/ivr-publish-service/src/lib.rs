//! IVR Publish Service - puts call flows live on the switch
//!
//! Ties the flow engine and the manager client together:
//!
//! - [`FlowService`]: flow CRUD and the publish pipeline
//!   (validate, compile, deploy, authenticate, reload)
//! - [`deploy`]: staged, atomic installation of dialplan files, either
//!   through `sudo` or directly
//! - [`AuditLogSink`]: JSON-lines record of publish events
//! - [`ServiceConfig`]: the JSON configuration file
//!
//! # Example
//!
//! ```ignore
//! use ivr_engine::EventBus;
//! use ivr_publish_service::{FlowService, ServiceConfig};
//!
//! let config = ServiceConfig::load(path).await?;
//! let service = FlowService::from_config(&config, EventBus::new())?;
//! let outcome = service.publish_flow(&flow_id).await?;
//! ```

pub mod audit;
pub mod config;
pub mod constants;
pub mod deploy;
pub mod error;
pub mod service;

pub use audit::AuditLogSink;
pub use config::{ConfigError, DeployConfig, DeployMode, ServiceConfig};
pub use deploy::{
    CommandOutput, ConfigPublisher, DeployError, DeployStep, LocalPublisher, PrivilegeRunner,
    PrivilegedPublisher, SudoRunner,
};
pub use error::{Result, ServiceError};
pub use service::{FlowService, PublishOutcome, SwitchControl};
