//! Request descriptors.
//!
//! A [`RequestDescriptor`] is built once by the caller and never mutated. The
//! retry scheduler re-issues the same descriptor verbatim, so everything a
//! request needs except headers lives here. Headers are read from the shared
//! header table at dispatch time.

use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{CourierError, Result};

/// Progress sink: `(transferred_bytes, total_bytes)`.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// HTTP verb for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    /// GET whose body is streamed to `save_path` instead of memory.
    Download,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Download => "DOWNLOAD",
        }
    }

    /// Whether a body is sent on the wire for this verb.
    pub fn carries_body(&self) -> bool {
        !matches!(self, Method::Get | Method::Download)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "DOWNLOAD" => Ok(Method::Download),
            other => Err(CourierError::invalid(
                "method",
                format!("unsupported verb {other}"),
            )),
        }
    }
}

/// How the body is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    #[default]
    Json,
    Multipart,
}

/// One value of a form payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        bytes: Bytes,
        mime: Option<String>,
    },
}

/// A named form field.
#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                file_name: file_name.into(),
                bytes: bytes.into(),
                mime: None,
            },
        }
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyPayload {
    Json(serde_json::Value),
    Form(Vec<FormField>),
}

impl BodyPayload {
    /// Serialize any value into a JSON payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(BodyPayload::Json(serde_json::to_value(value)?))
    }

    /// Flatten the payload into form fields.
    ///
    /// Object members become text parts; non-string values are rendered as
    /// JSON text. Scalars and arrays become a single `value` part.
    pub fn to_form_fields(&self) -> Vec<FormField> {
        match self {
            BodyPayload::Form(fields) => fields.clone(),
            BodyPayload::Json(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(name, value)| FormField::text(name.clone(), render_form_text(value)))
                .collect(),
            BodyPayload::Json(serde_json::Value::Null) => Vec::new(),
            BodyPayload::Json(other) => vec![FormField::text("value", render_form_text(other))],
        }
    }

    /// Encode the payload as JSON bytes.
    ///
    /// Form payloads with only text parts become a JSON object; file parts
    /// cannot be JSON-encoded.
    pub fn to_json_bytes(&self) -> Result<Bytes> {
        let value = match self {
            BodyPayload::Json(value) => value.clone(),
            BodyPayload::Form(fields) => {
                let mut map = serde_json::Map::new();
                for field in fields {
                    match &field.value {
                        FormValue::Text(text) => {
                            map.insert(field.name.clone(), serde_json::Value::String(text.clone()));
                        }
                        FormValue::File { .. } => {
                            return Err(CourierError::invalid(
                                "body",
                                format!("file part {} requires multipart encoding", field.name),
                            ));
                        }
                    }
                }
                serde_json::Value::Object(map)
            }
        };
        Ok(Bytes::from(serde_json::to_vec(&value)?))
    }

    fn has_file_parts(&self) -> bool {
        match self {
            BodyPayload::Form(fields) => fields
                .iter()
                .any(|f| matches!(f.value, FormValue::File { .. })),
            BodyPayload::Json(_) => false,
        }
    }
}

fn render_form_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Immutable description of one HTTP call.
#[derive(Clone)]
pub struct RequestDescriptor {
    url: String,
    method: Method,
    query: BTreeMap<String, String>,
    body: Option<BodyPayload>,
    encoding: BodyEncoding,
    on_send_progress: Option<ProgressCallback>,
    on_receive_progress: Option<ProgressCallback>,
    save_path: Option<PathBuf>,
}

impl RequestDescriptor {
    /// Start building a descriptor.
    pub fn builder(method: Method, url: impl Into<String>) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder::new(method, url)
    }

    /// Shorthand for a plain GET.
    pub fn get(url: impl Into<String>) -> Result<Self> {
        Self::builder(Method::Get, url).build()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn body(&self) -> Option<&BodyPayload> {
        self.body.as_ref()
    }

    pub fn encoding(&self) -> BodyEncoding {
        self.encoding
    }

    pub fn on_send_progress(&self) -> Option<&ProgressCallback> {
        self.on_send_progress.as_ref()
    }

    pub fn on_receive_progress(&self) -> Option<&ProgressCallback> {
        self.on_receive_progress.as_ref()
    }

    /// Destination for `DOWNLOAD` requests; `None` for every other verb.
    pub fn save_path(&self) -> Option<&PathBuf> {
        self.save_path.as_ref()
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("encoding", &self.encoding)
            .field("on_send_progress", &self.on_send_progress.is_some())
            .field("on_receive_progress", &self.on_receive_progress.is_some())
            .field("save_path", &self.save_path)
            .finish()
    }
}

/// Callbacks compare by presence; closures have no meaningful equality.
impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.method == other.method
            && self.query == other.query
            && self.body == other.body
            && self.encoding == other.encoding
            && self.on_send_progress.is_some() == other.on_send_progress.is_some()
            && self.on_receive_progress.is_some() == other.on_receive_progress.is_some()
            && self.save_path == other.save_path
    }
}

/// Builder for [`RequestDescriptor`].
pub struct RequestDescriptorBuilder {
    url: String,
    method: Method,
    query: BTreeMap<String, String>,
    body: Option<BodyPayload>,
    encoding: BodyEncoding,
    on_send_progress: Option<ProgressCallback>,
    on_receive_progress: Option<ProgressCallback>,
    save_path: Option<PathBuf>,
}

impl RequestDescriptorBuilder {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            query: BTreeMap::new(),
            body: None,
            encoding: BodyEncoding::default(),
            on_send_progress: None,
            on_receive_progress: None,
            save_path: None,
        }
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Replace all query parameters.
    pub fn query_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query = params.into_iter().collect();
        self
    }

    /// Set the body payload.
    pub fn body(mut self, body: BodyPayload) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a JSON body from a raw value.
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(BodyPayload::Json(value));
        self
    }

    /// Set the body encoding.
    pub fn encoding(mut self, encoding: BodyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Report upload progress.
    pub fn on_send_progress(
        mut self,
        callback: impl Fn(u64, Option<u64>) + Send + Sync + 'static,
    ) -> Self {
        self.on_send_progress = Some(Arc::new(callback));
        self
    }

    /// Report download progress.
    pub fn on_receive_progress(
        mut self,
        callback: impl Fn(u64, Option<u64>) + Send + Sync + 'static,
    ) -> Self {
        self.on_receive_progress = Some(Arc::new(callback));
        self
    }

    /// Destination file for `DOWNLOAD` requests.
    pub fn save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }

    /// Validate and freeze the descriptor.
    pub fn build(self) -> Result<RequestDescriptor> {
        if self.url.trim().is_empty() {
            return Err(CourierError::invalid("url", "must not be empty"));
        }

        let save_path = match self.method {
            Method::Download => match self.save_path {
                Some(path) if !path.as_os_str().is_empty() => Some(path),
                _ => {
                    return Err(CourierError::invalid(
                        "save_path",
                        "required for DOWNLOAD requests",
                    ))
                }
            },
            _ => None,
        };

        let body = if self.method.carries_body() {
            self.body
        } else {
            if self.body.is_some() {
                tracing::debug!("Dropping body on {} {}", self.method, self.url);
            }
            None
        };

        if let Some(body) = &body {
            if self.encoding == BodyEncoding::Json && body.has_file_parts() {
                return Err(CourierError::invalid(
                    "body",
                    "file parts require multipart encoding",
                ));
            }
        }

        Ok(RequestDescriptor {
            url: self.url,
            method: self.method,
            query: self.query,
            body,
            encoding: self.encoding,
            on_send_progress: self.on_send_progress,
            on_receive_progress: self.on_receive_progress,
            save_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_url_rejected() {
        let err = RequestDescriptor::builder(Method::Get, "  ").build().unwrap_err();
        assert!(matches!(err, CourierError::InvalidRequest { field: "url", .. }));
    }

    #[test]
    fn test_download_requires_save_path() {
        let err = RequestDescriptor::builder(Method::Download, "/file.bin")
            .build()
            .unwrap_err();
        assert!(matches!(err, CourierError::InvalidRequest { field: "save_path", .. }));

        let err = RequestDescriptor::builder(Method::Download, "/file.bin")
            .save_path("")
            .build()
            .unwrap_err();
        assert!(matches!(err, CourierError::InvalidRequest { field: "save_path", .. }));

        let ok = RequestDescriptor::builder(Method::Download, "/file.bin")
            .save_path("/tmp/file.bin")
            .build()
            .unwrap();
        assert_eq!(ok.save_path(), Some(&PathBuf::from("/tmp/file.bin")));
    }

    #[test]
    fn test_save_path_ignored_for_other_verbs() {
        let req = RequestDescriptor::builder(Method::Post, "/upload")
            .save_path("/tmp/x")
            .build()
            .unwrap();
        assert!(req.save_path().is_none());
    }

    #[test]
    fn test_get_drops_body() {
        let req = RequestDescriptor::builder(Method::Get, "/users")
            .json(json!({"a": 1}))
            .build()
            .unwrap();
        assert!(req.body().is_none());
    }

    #[test]
    fn test_file_parts_need_multipart() {
        let body = BodyPayload::Form(vec![FormField::file("avatar", "a.png", vec![1u8, 2, 3])]);
        let err = RequestDescriptor::builder(Method::Post, "/upload")
            .body(body.clone())
            .build()
            .unwrap_err();
        assert!(matches!(err, CourierError::InvalidRequest { field: "body", .. }));

        let ok = RequestDescriptor::builder(Method::Post, "/upload")
            .body(body)
            .encoding(BodyEncoding::Multipart)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_json_object_flattens_to_form_fields() {
        let body = BodyPayload::Json(json!({"name": "Ana", "age": 30, "tags": ["a", "b"]}));
        let fields = body.to_form_fields();
        assert_eq!(fields.len(), 3);
        assert!(fields.contains(&FormField::text("name", "Ana")));
        assert!(fields.contains(&FormField::text("age", "30")));
        assert!(fields.contains(&FormField::text("tags", r#"["a","b"]"#)));
    }

    #[test]
    fn test_text_form_encodes_as_json_object() {
        let body = BodyPayload::Form(vec![FormField::text("q", "rust")]);
        let bytes = body.to_json_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"q": "rust"}));
    }

    #[test]
    fn test_equality_ignores_callback_identity() {
        let a = RequestDescriptor::builder(Method::Get, "/x")
            .query("page", "1")
            .on_receive_progress(|_, _| {})
            .build()
            .unwrap();
        let b = RequestDescriptor::builder(Method::Get, "/x")
            .query("page", "1")
            .on_receive_progress(|_, _| {})
            .build()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
        assert!(!Method::Download.carries_body());
        assert!(Method::Delete.carries_body());
    }
}
