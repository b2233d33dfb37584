pub mod send_notification;

use std::sync::Arc;

use runwatch_settings::NotificationSettings;

use crate::registry::ToolRegistry;
use send_notification::{NotificationSink, SendNotificationTool};

/// Create a ToolRegistry with the tools every run exposes.
pub fn create_default_registry(
    sink: Arc<dyn NotificationSink>,
    settings: &NotificationSettings,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SendNotificationTool::new(sink, settings)));
    registry
}
