//! Typed property of a node

use crate::config::PropertyConfig;
use crate::device::Device;
use crate::error::DeviceResult;
use crate::protocol::{
    format_bool, PropertyDataType, DATATYPE_ATTRIBUTE, FORMAT_ATTRIBUTE, NAME_ATTRIBUTE,
    RETAINED_ATTRIBUTE, SETTABLE_ATTRIBUTE, UNIT_ATTRIBUTE,
};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Invoked with the property and the requested value of an inbound `/set`
pub type SetHandler = Arc<dyn Fn(&Property, &str) + Send + Sync>;

pub struct Property {
    name: String,
    datatype: PropertyDataType,
    settable: bool,
    retained: bool,
    unit: Option<String>,
    format: Option<String>,
    value: Mutex<Option<String>>,
    on_set: Option<SetHandler>,
}

impl Property {
    /// Read-only, retained property without a value
    pub fn new<S: Into<String>>(name: S, datatype: PropertyDataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            settable: false,
            retained: true,
            unit: None,
            format: None,
            value: Mutex::new(None),
            on_set: None,
        }
    }

    pub fn from_config(config: &PropertyConfig) -> Self {
        Self {
            name: config.name.clone(),
            datatype: config.datatype,
            settable: config.settable,
            retained: config.retained,
            unit: config.unit.clone(),
            format: config.format.clone(),
            value: Mutex::new(None),
            on_set: None,
        }
    }

    pub fn with_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_format<S: Into<String>>(mut self, format: S) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Make the property settable without a handler; requested values are stored
    pub fn settable(mut self) -> Self {
        self.settable = true;
        self
    }

    /// Make the property settable and handle inbound `/set` messages
    pub fn on_set<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Property, &str) + Send + Sync + 'static,
    {
        self.settable = true;
        self.on_set = Some(Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> PropertyDataType {
        self.datatype
    }

    pub fn is_settable(&self) -> bool {
        self.settable
    }

    pub fn is_retained(&self) -> bool {
        self.retained
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Last stored value
    pub fn value(&self) -> Option<String> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store a value without publishing it
    pub fn store(&self, value: &str) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.to_string());
    }

    /// Dispatch an inbound `/set` payload
    pub fn handle_set(&self, payload: &[u8]) {
        let requested = String::from_utf8_lossy(payload);
        match &self.on_set {
            Some(handler) => handler(self, &requested),
            None => {
                info!(property = %self.name, value = %requested, "Stored value from set request");
                self.store(&requested);
            }
        }
    }

    /// Publish the attributes and current value below `<node>/<property>`
    pub async fn publish(&self, device: &Device, node: &str) -> DeviceResult<()> {
        let base = format!("{node}/{}", self.name);

        let mut attributes = vec![
            (NAME_ATTRIBUTE, self.name.clone()),
            (DATATYPE_ATTRIBUTE, self.datatype.to_string()),
            (SETTABLE_ATTRIBUTE, format_bool(self.settable).to_string()),
            (RETAINED_ATTRIBUTE, format_bool(self.retained).to_string()),
        ];
        if let Some(unit) = &self.unit {
            attributes.push((UNIT_ATTRIBUTE, unit.clone()));
        }
        if let Some(format) = &self.format {
            attributes.push((FORMAT_ATTRIBUTE, format.clone()));
        }

        for (attribute, value) in attributes {
            device
                .send_message(&format!("{base}/{attribute}"), value)
                .await?;
        }

        if let Some(value) = self.value() {
            device.publish(&base, value, self.retained).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("datatype", &self.datatype)
            .field("settable", &self.settable)
            .field("retained", &self.retained)
            .field("value", &self.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let property = Property::new("temperature", PropertyDataType::Float);
        assert!(!property.is_settable());
        assert!(property.is_retained());
        assert!(property.value().is_none());
        assert!(property.unit().is_none());
    }

    #[test]
    fn test_set_without_handler_stores_value() {
        let property = Property::new("target", PropertyDataType::Integer).settable();
        property.handle_set(b"21");
        assert_eq!(property.value().as_deref(), Some("21"));
    }

    #[test]
    fn test_set_handler_receives_payload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let property = Property::new("power", PropertyDataType::Boolean).on_set(
            move |property, value| {
                assert_eq!(property.name(), "power");
                assert_eq!(value, "true");
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(property.is_settable());
        property.handle_set(b"true");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The handler decides whether to store
        assert!(property.value().is_none());
    }

    #[test]
    fn test_from_config() {
        let config = PropertyConfig {
            name: "humidity".to_string(),
            datatype: PropertyDataType::Float,
            settable: false,
            retained: false,
            unit: Some("%".to_string()),
            format: Some("0:100".to_string()),
        };
        let property = Property::from_config(&config);
        assert_eq!(property.name(), "humidity");
        assert!(!property.is_retained());
        assert_eq!(property.unit(), Some("%"));
        assert_eq!(property.format(), Some("0:100"));
    }
}
