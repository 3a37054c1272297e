//! Data models shared by the client, the gateway and the realtime layer.

mod client_config;
mod connection_options;
mod realtime_event;
mod record_subscription_event;
mod request_options;
mod submit_subscriptions_request;
mod subscription_options;

pub use client_config::{ClientConfig, Protocol};
pub use connection_options::ConnectionOptions;
pub use realtime_event::RealtimeEvent;
pub use record_subscription_event::{RecordAction, RecordSubscriptionEvent};
pub use request_options::{FileAttachment, RequestOptions};
pub use submit_subscriptions_request::SubmitSubscriptionsRequest;
pub use subscription_options::SubscriptionOptions;
