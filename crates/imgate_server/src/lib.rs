#![forbid(unsafe_code)]

pub mod config;
pub mod server;

pub use server::auth::{AuthError, Authenticator, HmacAuthenticator, TestTokenAuthenticator};
pub use server::dispatch::{DispatchError, Dispatcher, MessageHandler};
pub use server::gateway::{Gateway, GatewayOptions};
pub use server::group_store::{GroupRepository, GroupStore};
pub use server::metrics::{CountingMetrics, MetricsSink, MetricsSnapshot, NoopMetrics, RecorderMetrics};
pub use server::registry::Registry;
pub use server::session::{Session, SessionError, SessionSettings};
