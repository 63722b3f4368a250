// Capability surface the embedding page exposes to the bridge.
// Everything that touches the host document goes through these traits so
// the coordination code never reaches for a global.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Shared handle to an element in the host document
pub type ElementRef = Arc<dyn HostElement>;

/// Callback invoked when an element is clicked
pub type ClickListener = Arc<dyn Fn() + Send + Sync>;

/// A single element of the host document
pub trait HostElement: Send + Sync + fmt::Debug {
    /// Current form value (empty for non-form elements)
    fn value(&self) -> String;

    fn set_value(&self, value: &str);

    /// Fire a bubbling `input` event so reactive frameworks bound to the
    /// element pick up a programmatic value change
    fn dispatch_input(&self);

    fn click(&self);

    /// Add or remove a class (the `classList.toggle(name, force)` form)
    fn set_class(&self, class: &str, enabled: bool);

    fn has_class(&self, class: &str) -> bool;

    fn attribute(&self, name: &str) -> Option<String>;

    fn set_attribute(&self, name: &str, value: &str);

    fn add_click_listener(&self, listener: ClickListener);
}

/// The queryable root of the host document plus the few page-level
/// services the bridge needs
pub trait HostRoot: Send + Sync {
    fn query_selector(&self, selector: &str) -> Option<ElementRef>;

    fn query_selector_all(&self, selector: &str) -> Vec<ElementRef>;

    /// Create an element and append it to the top-level container
    fn append_element(&self, id: &str, classes: &[&str]) -> ElementRef;

    /// Create an element and insert it as the previous sibling of `anchor`
    fn insert_before(&self, anchor: &ElementRef, classes: &[&str]) -> ElementRef;

    /// Current address of the page
    fn location(&self) -> String;

    /// Rewrite the address bar without navigating
    fn replace_location(&self, url: &str);

    /// Show a toast-style notification
    fn notify(&self, notification: &Notification);

    /// Open a URL in a new window
    fn open_window(&self, url: &str);
}

/// User-visible outcome message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub success: bool,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
