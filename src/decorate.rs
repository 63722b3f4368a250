// Saved-page shortcuts on model cards.
// The backend keeps an index of saved model pages keyed by model path; every
// card whose copy-path button points at an indexed model gets an extra
// button that opens the saved page.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::host::HostRoot;
use crate::status::LinkBackend;
use crate::status::backend;

pub const PATH_ATTRIBUTE: &str = "data-clipboard-text";
pub const DECORATED_ATTRIBUTE: &str = "data-civitai-page";
pub const OPEN_PAGE_CLASSES: [&str; 2] = ["open-civ-page", "card-button"];

static EXTENSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.[^/.]+$").expect("static regex"));

/// Strip the final file extension, leaving directories untouched
pub fn strip_extension(path: &str) -> &str {
    match EXTENSION.find(path) {
        Some(m) => &path[..m.start()],
        None => path,
    }
}

/// Relative URL that serves the saved page called `filename`
pub fn page_url(filename: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(filename.as_bytes()).collect();
    // encodeURIComponent keeps spaces as %20
    format!("./civitai/get-mhtml?filename={}", encoded.replace('+', "%20"))
}

pub struct CardDecorator {
    root: Arc<dyn HostRoot>,
    backend: Arc<dyn LinkBackend>,
    selector: String,
}

impl CardDecorator {
    pub fn new(root: Arc<dyn HostRoot>, backend: Arc<dyn LinkBackend>, selector: impl Into<String>) -> Self {
        Self {
            root,
            backend,
            selector: selector.into(),
        }
    }

    /// Fetch the page index and decorate every matching card button that
    /// is not decorated yet. Returns how many buttons were decorated.
    pub async fn decorate(&self) -> usize {
        let index = match backend::call(&self.backend, |b| b.page_index()).await {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(error = %e, "could not fetch saved page index");
                HashMap::new()
            }
        };
        self.apply(&index)
    }

    /// Decorate against an already fetched index
    pub fn apply(&self, index: &HashMap<String, String>) -> usize {
        if index.is_empty() {
            return 0;
        }

        let mut decorated = 0;
        for button in self.root.query_selector_all(&self.selector) {
            if button.attribute(DECORATED_ATTRIBUTE).is_some() {
                continue;
            }
            let Some(path) = button.attribute(PATH_ATTRIBUTE) else {
                continue;
            };
            let Some(filename) = index.get(strip_extension(&path)) else {
                continue;
            };

            let url = page_url(filename);
            let opener = self.root.insert_before(&button, &OPEN_PAGE_CLASSES);
            opener.set_attribute("title", filename);
            let root = Arc::clone(&self.root);
            let target = url.clone();
            opener.add_click_listener(Arc::new(move || root.open_window(&target)));
            button.set_attribute(DECORATED_ATTRIBUTE, &url);
            decorated += 1;
        }

        tracing::debug!(decorated, "decorated model cards");
        decorated
    }
}
