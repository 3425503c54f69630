//! Outbound HTTP clients for sibling services, behind trait seams so
//! services can be tested with local fakes.

pub mod digital_twin;
pub mod image_hub;
pub mod notification;

pub use digital_twin::{DigitalTwinApiClient, LocalDigitalTwinApi, RemoteDigitalTwinApi};
pub use image_hub::{ImageHubClient, LocalImageHub, RemoteImageHub, StoredImage};
pub use notification::{
    LoggingNotificationClient, NotificationClient, NotificationMessage, RemoteNotificationClient,
};
