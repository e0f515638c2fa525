//! Alarm lifecycle services.

#![allow(missing_docs)]

pub mod calendar;
pub mod clock;
pub mod deactivation;
pub mod device_token;
pub mod materializer;
pub mod notification_dispatcher;
pub mod occurrence_store;
pub mod preview;
pub mod push_gateway;
pub mod ringing;

pub use clock::{Clock, SystemClock};
pub use deactivation::{DeactivationService, OffResult, WEEKLY_OFF_LIMIT};
pub use device_token::{DeviceTokenStore, RedisDeviceTokenStore};
pub use materializer::{MaterializationSummary, OccurrenceMaterializer};
pub use notification_dispatcher::{
    DispatchReport, InvalidAddress, MULTICAST_LIMIT, NotificationDispatcher, PreAlertTarget,
    RingingTarget,
};
pub use occurrence_store::{OccurrenceStore, SeaOrmOccurrenceStore};
pub use preview::{AlarmPreview, PreviewService};
pub use push_gateway::{FcmGateway, MulticastMessage, PushGateway};
pub use ringing::{RingingService, RingingWindows};
