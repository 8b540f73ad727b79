//! Query handlers backed by local storage.

pub mod memory;

pub use memory::{MemoryStore, QueryBackend};

use serde_json::Value;

use crate::wire::selector_text;

/// Field holding a document's identity.
pub const ID_FIELD: &str = "Id";

/// Identity of `document` in selector-id form.
pub fn document_id(document: &Value) -> Option<String> {
    document.get(ID_FIELD).and_then(selector_text)
}
