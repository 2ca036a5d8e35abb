//! Core type definitions for ClassifiedWebRequest
//!
//! `RawRequest` is what a request source hands to the pipeline;
//! `RequestRecord` is the normalized shape listeners receive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Request Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUB_FRAME = 1 << 5;
        const MAIN_FRAME = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        const CSP_REPORT = 1 << 12;
        const BEACON = 1 << 13;
        const IMAGESET = 1 << 14;
        const OBJECT_SUBREQUEST = 1 << 15;

        /// All request types
        const ALL = 0xFFFF;
    }
}

impl RequestType {
    /// Parse from browser request type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "main_frame" => Self::MAIN_FRAME,
            "sub_frame" => Self::SUB_FRAME,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "imageset" => Self::IMAGESET,
            "font" => Self::FONT,
            "object" => Self::OBJECT,
            "object_subrequest" => Self::OBJECT_SUBREQUEST,
            "xmlhttprequest" => Self::XMLHTTPREQUEST,
            "ping" => Self::PING,
            "beacon" => Self::BEACON,
            "csp_report" => Self::CSP_REPORT,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            _ => Self::OTHER,
        }
    }

    /// Build a mask from a list of type names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        names
            .iter()
            .fold(Self::empty(), |mask, name| mask | Self::from_str(name.as_ref()))
    }
}

// =============================================================================
// Request Payload Pieces
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpHeader {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<UploadData>>,
}

/// Server requesting authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenger {
    pub host: String,
    pub port: u16,
}

// =============================================================================
// Raw Request (inbound)
// =============================================================================

/// A request event as delivered by the request source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawRequest {
    pub request_id: String,
    pub url: String,
    pub origin_url: Option<String>,
    pub document_url: Option<String>,
    pub method: String,
    #[serde(rename = "type")]
    pub request_type: String,
    pub time_stamp: Option<f64>,
    pub window_id: i64,
    pub parent_window_id: i64,
    /// Set for requests made by the browser itself (updates, OCSP, ...).
    pub is_system_principal: bool,
    pub from_cache: Option<bool>,
    pub ip: Option<String>,
    pub request_headers: Option<Vec<HttpHeader>>,
    pub response_headers: Option<Vec<HttpHeader>>,
    pub status_code: Option<u16>,
    pub status_line: Option<String>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
    pub request_body: Option<RequestBody>,
    pub scheme: Option<String>,
    pub realm: Option<String>,
    pub is_proxy: Option<bool>,
    pub challenger: Option<Challenger>,
}

impl RawRequest {
    /// Minimal GET request, mostly useful for tests and tools.
    pub fn new(request_id: impl Into<String>, url: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            url: url.into(),
            method: "GET".to_string(),
            request_type: request_type.into(),
            ..Self::default()
        }
    }

    pub fn with_origin(mut self, origin_url: impl Into<String>) -> Self {
        let origin_url = origin_url.into();
        self.document_url = Some(origin_url.clone());
        self.origin_url = Some(origin_url);
        self
    }

    #[inline]
    pub fn kind(&self) -> RequestType {
        RequestType::from_str(&self.request_type)
    }
}

// =============================================================================
// Request Record (delivered to listeners)
// =============================================================================

/// Normalized request handed to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub request_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    pub method: String,
    pub tab_id: i64,
    pub window_id: i64,
    pub frame_id: i64,
    pub parent_frame_id: i64,
    #[serde(rename = "type")]
    pub request_type: String,
    /// Milliseconds since the Unix epoch.
    pub time_stamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<HttpHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HttpHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_proxy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenger: Option<Challenger>,
}

// =============================================================================
// Blocking Decision
// =============================================================================

/// Decision returned by a blocking listener. No response means allow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingResponse {
    pub cancel: bool,
}

impl BlockingResponse {
    pub const CANCEL: Self = Self { cancel: true };
    pub const ALLOW: Self = Self { cancel: false };
}

// =============================================================================
// Listener Filter & Extra Info
// =============================================================================

/// Registration-time filter for request listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestFilter {
    /// Classification names; a request must match at least one.
    pub classified_as: Option<Vec<String>>,
    /// Match patterns; defaults to `*://*/*`.
    pub urls: Option<Vec<String>>,
    pub types: Option<Vec<String>>,
    pub tab_id: Option<i64>,
    pub window_id: Option<i64>,
}

impl RequestFilter {
    pub fn classified_as(name: impl Into<String>) -> Self {
        Self {
            classified_as: Some(vec![name.into()]),
            ..Self::default()
        }
    }

    pub fn urls<S: Into<String>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            urls: Some(patterns.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

/// Optional listener capabilities requested at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtraInfoSpec {
    /// The listener's return value decides whether the request is cancelled.
    Blocking,
    RequestHeaders,
    ResponseHeaders,
    RequestBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_from_str() {
        assert_eq!(RequestType::from_str("main_frame"), RequestType::MAIN_FRAME);
        assert_eq!(RequestType::from_str("sub_frame"), RequestType::SUB_FRAME);
        assert_eq!(RequestType::from_str("bogus"), RequestType::OTHER);
    }

    #[test]
    fn test_request_type_from_names() {
        let mask = RequestType::from_names(&["script", "image"]);
        assert!(mask.contains(RequestType::SCRIPT));
        assert!(mask.contains(RequestType::IMAGE));
        assert!(!mask.contains(RequestType::MAIN_FRAME));
    }

    #[test]
    fn test_raw_request_from_json() {
        let raw: RawRequest = serde_json::from_str(
            r#"{"requestId":"7","url":"https://tracker.net/px","originUrl":"https://example.com/",
                "method":"GET","type":"image","windowId":4,"parentWindowId":2,"isSystemPrincipal":false}"#,
        )
        .unwrap();
        assert_eq!(raw.request_id, "7");
        assert_eq!(raw.kind(), RequestType::IMAGE);
        assert_eq!(raw.window_id, 4);
        assert_eq!(raw.document_url, None);
    }

    #[test]
    fn test_record_skips_absent_optionals() {
        let record = RequestRecord {
            request_id: "1".to_string(),
            url: "https://example.com/".to_string(),
            origin_url: None,
            document_url: None,
            method: "GET".to_string(),
            tab_id: -1,
            window_id: -1,
            frame_id: 0,
            parent_frame_id: -1,
            request_type: "main_frame".to_string(),
            time_stamp: 0.0,
            from_cache: None,
            ip: None,
            request_headers: None,
            response_headers: None,
            status_code: None,
            status_line: None,
            error: None,
            redirect_url: None,
            request_body: None,
            scheme: None,
            realm: None,
            is_proxy: None,
            challenger: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "main_frame");
        assert_eq!(json["parentFrameId"], -1);
        assert!(json.get("ip").is_none());
    }

    #[test]
    fn test_extra_info_names() {
        let info: Vec<ExtraInfoSpec> = serde_json::from_str(r#"["blocking","requestHeaders"]"#).unwrap();
        assert_eq!(info, vec![ExtraInfoSpec::Blocking, ExtraInfoSpec::RequestHeaders]);
    }
}
