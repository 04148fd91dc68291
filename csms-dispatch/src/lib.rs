//! # CSMS Dispatch
//!
//! OCPP 1.5/1.6 action registry and command dispatch engine for a central
//! system (CSMS).
//!
//! Operators issue typed commands to one or many charge points; each device
//! is reached over its own transport (OCPP-J WebSocket or synchronous
//! document exchange) in the protocol version it negotiated. Charge points
//! send their own requests over the same transports and get answered by the
//! registered handlers.
//!
//! ## Architecture
//!
//! ```text
//! Operator / admin surface
//!       │ typed request + selectors
//!       ▼
//! ┌──────────────────────────────────────────┐
//! │ Dispatcher                               │
//! │  ┌──────────┐  ┌───────┐  ┌───────────┐  │
//! │  │ Registry │  │ Codec │  │ Correlator│  │
//! │  └──────────┘  └───────┘  └───────────┘  │
//! │  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ InboundRouter│◄─┤ Handlers         │  │
//! │  └──────────────┘  └──────────────────┘  │
//! └───────────┬───────────────────┬──────────┘
//!             │                   │
//!     WebSocketAdapter     DocumentAdapter
//!      [2,id,action,{}]     header/body doc
//!             │                   │
//!             ▼                   ▼
//!       charge points       charge points
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use csms_dispatch::{
//!     config::DispatchConfig, handlers::standard_handlers, ocpp::v16, Dispatcher,
//!     DeviceSelector, ProtocolVersion, WebSocketAdapter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatchConfig::default();
//!     let websocket = WebSocketAdapter::new(config.websocket.clone());
//!
//!     let dispatcher = Dispatcher::builder()
//!         .handlers(standard_handlers(&config))
//!         .adapter(Arc::new(websocket.clone()))
//!         .config(config)
//!         .build();
//!     dispatcher.spawn_sweeper();
//!     tokio::spawn(async move { websocket.listen().await });
//!
//!     let selectors = [DeviceSelector::websocket("CP-1", ProtocolVersion::V16)];
//!     for handle in dispatcher.call(v16::ClearCacheRequest {}, &selectors).await {
//!         let response = handle.wait().await?;
//!         println!("{:?}", response.status);
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod handlers;
pub mod ocpp;
pub mod persistence;
pub mod registry;
pub mod reservation;
pub mod router;
pub mod transport;

pub use config::{ConfigError, DispatchConfig};
pub use correlator::{CallState, Correlator, CorrelatorStats};
pub use error::{DecodeError, DispatchError, HandlerError};
pub use handlers::{standard_handlers, Handlers, InboundContext};
pub use ocpp::{OcppCall, OcppRequest, OcppResponse, ProtocolVersion, WireMessage};
pub use persistence::{DeviceRepository, InMemoryRepository};
pub use registry::SchemaRegistry;
pub use reservation::{reserve_connector, ReserveNowParams};
pub use router::{CallHandle, Dispatcher, DispatcherBuilder};
pub use transport::{
    DeviceSelector, DocumentAdapter, TransportAdapter, TransportKind, WebSocketAdapter,
};
