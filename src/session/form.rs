use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Wizard form state keyed by field name.
pub type FormData = HashMap<String, FormValue>;

/// A single wizard form field value.
///
/// Variant order matters for untagged deserialization: `File` must precede
/// `Map` so a stored descriptor is not read back as a plain map, and
/// `Binary` sits last so it can never win over `List`/`Map` on read
/// (sanitization removes it before storage anyway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    File(FileDescriptor),
    List(Vec<FormValue>),
    Map(HashMap<String, FormValue>),
    Binary(BinaryBlob),
}

/// Raw uploaded bytes held in memory while a wizard step is in flight.
/// Never persisted; [`sanitize_form_data`] replaces it with a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryBlob {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Stand-in persisted instead of blob bytes: enough to show the user what
/// was attached and to re-prompt for the file on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(rename = "_type")]
    marker: FileMarker,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum FileMarker {
    File,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size: u64, content_type: impl Into<String>) -> Self {
        Self {
            marker: FileMarker::File,
            name: name.into(),
            size,
            content_type: content_type.into(),
        }
    }
}

impl From<&BinaryBlob> for FileDescriptor {
    fn from(blob: &BinaryBlob) -> Self {
        Self::new(
            blob.name.clone(),
            blob.bytes.len() as u64,
            blob.content_type.clone(),
        )
    }
}

impl FormValue {
    /// Deep-walk the value, replacing every binary blob with its descriptor.
    /// Everything else is preserved structurally.
    pub fn sanitized(self) -> FormValue {
        match self {
            FormValue::Binary(blob) => FormValue::File(FileDescriptor::from(&blob)),
            FormValue::List(items) => {
                FormValue::List(items.into_iter().map(FormValue::sanitized).collect())
            }
            FormValue::Map(fields) => FormValue::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, v.sanitized()))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Sanitize a whole form: blob bytes are dropped, descriptors kept.
pub fn sanitize_form_data(form_data: FormData) -> FormData {
    form_data
        .into_iter()
        .map(|(k, v)| (k, v.sanitized()))
        .collect()
}
