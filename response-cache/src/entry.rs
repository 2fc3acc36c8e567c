//! The stored form of a captured response.
//!
//! An entry is written as a single JSON document:
//!
//! ```json
//! { "statusCode": 200, "headers": { "content-type": "application/json" }, "body": { "id": 1 } }
//! ```
//!
//! JSON bodies are kept as JSON values so the stored document stays readable
//! by other consumers of the store. Any other UTF-8 body is stored as a JSON
//! string and tagged with `"bodyEncoding": "text"`.

use std::fmt;

use bytes::Bytes;
use http::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Response, StatusCode,
};
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::value::RawValue;

use crate::error::EntryError;

/// A single captured header value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HeaderField {
    /// A header with one value.
    Text(String),
    /// A numeric header, as written by producers that store `content-length` as a number.
    Number(serde_json::Number),
    /// A header repeated on the response, such as `set-cookie`.
    List(Vec<String>),
}

impl HeaderField {
    fn from_json(value: serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::String(s) => Some(Self::Text(s)),
            Value::Number(n) => Some(Self::Number(n)),
            Value::Array(items) => Some(Self::List(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    fn values(&self) -> Vec<String> {
        match self {
            Self::Text(s) => vec![s.clone()],
            Self::Number(n) => vec![n.to_string()],
            Self::List(items) => items.clone(),
        }
    }
}

/// Ordered mapping of header names to captured values.
///
/// Names are compared case-insensitively. Serializes as a JSON object whose
/// keys keep insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderBag {
    fields: Vec<(String, HeaderField)>,
}

impl HeaderBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a header map. Repeated headers become [`HeaderField::List`].
    ///
    /// Values are read as ISO-8859-1, so bytes outside visible ASCII survive
    /// and [`write_to`](Self::write_to) restores them exactly.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut bag = Self::new();
        for name in headers.keys() {
            let mut values: Vec<String> =
                headers.get_all(name).iter().map(latin1_decode).collect();
            let field = match values.len() {
                0 => continue,
                1 => HeaderField::Text(values.remove(0)),
                _ => HeaderField::List(values),
            };
            bag.fields.push((name.as_str().to_string(), field));
        }
        bag
    }

    /// Insert a header, replacing any value already stored under the same name.
    pub fn insert(&mut self, name: impl Into<String>, field: HeaderField) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
    }

    /// Look up a header by name.
    pub fn get(&self, name: &str) -> Option<&HeaderField> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, field)| field)
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderField)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no headers were captured.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Write every header onto `headers`, replacing existing values of the
    /// same name. Names or values that are no longer valid are skipped.
    pub fn write_to(&self, headers: &mut HeaderMap) {
        for (name, field) in &self.fields {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                log::debug!("skipping stored header with invalid name {name:?}");
                continue;
            };
            headers.remove(&name);
            for value in field.values() {
                match latin1_encode(&value) {
                    Some(value) => {
                        headers.append(name.clone(), value);
                    }
                    None => log::debug!(
                        "skipping stored value {value:?} of header {name}"
                    ),
                }
            }
        }
    }

    fn declares_json(&self) -> bool {
        let Some(HeaderField::Text(content_type)) = self.get(CONTENT_TYPE.as_str())
        else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence == "application/json" || essence.ends_with("+json")
    }
}

fn latin1_decode(value: &HeaderValue) -> String {
    value.as_bytes().iter().copied().map(char::from).collect()
}

// Strings with characters past U+00FF were written by another producer;
// their UTF-8 bytes are sent as is.
fn latin1_encode(value: &str) -> Option<HeaderValue> {
    let bytes: Vec<u8> = match value.chars().map(|c| u8::try_from(c).ok()).collect() {
        Some(bytes) => bytes,
        None => value.as_bytes().to_vec(),
    };
    HeaderValue::from_bytes(&bytes).ok()
}

impl Serialize for HeaderBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, field) in &self.fields {
            map.serialize_entry(name, field)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HeaderBag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BagVisitor;

        impl<'de> Visitor<'de> for BagVisitor {
            type Value = HeaderBag;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header names to values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<Self::Value, A::Error> {
                let mut bag = HeaderBag::new();
                while let Some((name, value)) =
                    access.next_entry::<String, serde_json::Value>()?
                {
                    // Shapes other than string, number and list are dropped.
                    if let Some(field) = HeaderField::from_json(value) {
                        bag.insert(name, field);
                    }
                }
                Ok(bag)
            }
        }

        deserializer.deserialize_map(BagVisitor)
    }
}

/// How the `body` of a stored entry is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// The body is the JSON document the handler produced.
    #[default]
    Json,
    /// The body is a JSON string holding the handler's UTF-8 text.
    Text,
}

impl BodyEncoding {
    fn is_json(&self) -> bool {
        *self == Self::Json
    }
}

/// A captured response: status, headers and body.
///
/// Entries are immutable once written. Expiry is not part of the entry; it
/// is owned by the store's TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Response status code.
    pub status_code: u16,
    /// Response headers as emitted by the handler.
    #[serde(default)]
    pub headers: HeaderBag,
    /// Response body.
    pub body: Box<RawValue>,
    /// Encoding of `body`.
    #[serde(default, skip_serializing_if = "BodyEncoding::is_json")]
    pub body_encoding: BodyEncoding,
}

impl CacheEntry {
    /// Build an entry from the pieces of a finished response.
    ///
    /// Fails when the body cannot be represented without loss: non UTF-8
    /// bytes, or a body whose content type claims JSON but does not parse.
    pub fn new(
        status: StatusCode,
        headers: HeaderBag,
        body: &[u8],
    ) -> Result<Self, EntryError> {
        let text = std::str::from_utf8(body).map_err(|_| EntryError::BinaryBody)?;

        if headers.declares_json() {
            let raw: Box<RawValue> =
                serde_json::from_str(text).map_err(EntryError::InvalidJson)?;
            // Surrounding whitespace is not kept by `RawValue`.
            if raw.get().len() == text.len() {
                return Ok(Self {
                    status_code: status.as_u16(),
                    headers,
                    body: raw,
                    body_encoding: BodyEncoding::Json,
                });
            }
        }

        let raw = serde_json::value::to_raw_value(text)
            .map_err(EntryError::Serialize)?;
        Ok(Self {
            status_code: status.as_u16(),
            headers,
            body: raw,
            body_encoding: BodyEncoding::Text,
        })
    }

    /// Parse an entry read from the store.
    pub fn from_json(value: &str) -> Result<Self, EntryError> {
        serde_json::from_str(value).map_err(EntryError::Malformed)
    }

    /// Serialize the entry for storage.
    pub fn to_json(&self) -> Result<String, EntryError> {
        serde_json::to_string(self).map_err(EntryError::Serialize)
    }

    /// The stored status code.
    pub fn status(&self) -> Result<StatusCode, EntryError> {
        StatusCode::from_u16(self.status_code)
            .map_err(|_| EntryError::InvalidStatus(self.status_code))
    }

    /// The body bytes exactly as the handler produced them.
    pub fn body_bytes(&self) -> Result<Bytes, EntryError> {
        match self.body_encoding {
            BodyEncoding::Json => {
                Ok(Bytes::copy_from_slice(self.body.get().as_bytes()))
            }
            BodyEncoding::Text => serde_json::from_str::<String>(self.body.get())
                .map(Bytes::from)
                .map_err(EntryError::Malformed),
        }
    }

    /// Rebuild the response this entry was captured from.
    pub fn into_response(self) -> Result<Response<Bytes>, EntryError> {
        let status = self.status()?;
        let body = self.body_bytes()?;
        let mut response = Response::new(body);
        *response.status_mut() = status;
        self.headers.write_to(response.headers_mut());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_headers() -> HeaderBag {
        let mut bag = HeaderBag::new();
        bag.insert("content-type", HeaderField::Text("application/json".into()));
        bag
    }

    #[test]
    fn json_body_is_stored_as_json_value() {
        let entry =
            CacheEntry::new(StatusCode::OK, json_headers(), br#"{"id":1}"#)
                .unwrap();
        assert_eq!(entry.body_encoding, BodyEncoding::Json);
        assert_eq!(
            entry.to_json().unwrap(),
            r#"{"statusCode":200,"headers":{"content-type":"application/json"},"body":{"id":1}}"#
        );
    }

    #[test]
    fn padded_json_falls_back_to_text() {
        let body = b"{\"id\": 1}\n";
        let entry =
            CacheEntry::new(StatusCode::OK, json_headers(), body).unwrap();
        assert_eq!(entry.body_encoding, BodyEncoding::Text);
        assert_eq!(entry.body_bytes().unwrap().as_ref(), body);
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = CacheEntry::new(StatusCode::OK, json_headers(), b"{nope")
            .unwrap_err();
        assert!(matches!(err, EntryError::InvalidJson(_)));
    }

    #[test]
    fn binary_body_is_rejected() {
        let err = CacheEntry::new(StatusCode::OK, HeaderBag::new(), &[0xff, 0xfe])
            .unwrap_err();
        assert!(matches!(err, EntryError::BinaryBody));
    }

    #[test]
    fn reads_entries_without_encoding_tag() {
        let stored = r#"{"statusCode":201,"headers":{"x-total":12,"set-cookie":["a=1","b=2"],"x-flag":true},"body":[1,2]}"#;
        let entry = CacheEntry::from_json(stored).unwrap();
        assert_eq!(entry.status().unwrap(), StatusCode::CREATED);
        assert_eq!(entry.body_bytes().unwrap().as_ref(), b"[1,2]");
        assert_eq!(entry.headers.len(), 2);
        assert_eq!(
            entry.headers.get("X-Total"),
            Some(&HeaderField::Number(12.into()))
        );
    }

    #[test]
    fn malformed_entry_is_an_error() {
        assert!(matches!(
            CacheEntry::from_json("{\"statusCode\":200"),
            Err(EntryError::Malformed(_))
        ));
        assert!(matches!(
            CacheEntry::from_json("{\"statusCode\":200,\"headers\":{}}"),
            Err(EntryError::Malformed(_))
        ));
    }

    #[test]
    fn header_map_round_trip_keeps_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let bag = HeaderBag::from_header_map(&headers);
        assert_eq!(
            bag.get("set-cookie"),
            Some(&HeaderField::List(vec!["a=1".into(), "b=2".into()]))
        );

        let mut restored = HeaderMap::new();
        bag.write_to(&mut restored);
        assert_eq!(restored, headers);
    }

    #[test]
    fn non_ascii_header_values_survive_storage() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-disposition",
            HeaderValue::from_bytes(b"attachment; filename=caf\xe9.txt").unwrap(),
        );
        headers.insert("x-tag", HeaderValue::from_static("plain"));

        let bag = HeaderBag::from_header_map(&headers);
        assert_eq!(bag.len(), 2);
        let stored = serde_json::to_string(&bag).unwrap();
        let bag: HeaderBag = serde_json::from_str(&stored).unwrap();

        let mut restored = HeaderMap::new();
        bag.write_to(&mut restored);
        assert_eq!(restored, headers);
    }

    #[test]
    fn utf8_header_values_from_other_producers_are_sent_as_bytes() {
        let mut bag = HeaderBag::new();
        bag.insert("x-city", HeaderField::Text("Łódź".into()));
        bag.insert("x-bad", HeaderField::Text("a\nb".into()));
        let mut headers = HeaderMap::new();
        bag.write_to(&mut headers);
        assert_eq!(headers["x-city"].as_bytes(), "Łódź".as_bytes());
        assert!(!headers.contains_key("x-bad"));
    }

    #[test]
    fn header_bag_serializes_in_insertion_order() {
        let mut bag = HeaderBag::new();
        bag.insert("z-last", HeaderField::Text("1".into()));
        bag.insert("a-first", HeaderField::Text("2".into()));
        bag.insert("Z-Last", HeaderField::Text("3".into()));
        assert_eq!(
            serde_json::to_string(&bag).unwrap(),
            r#"{"z-last":"3","a-first":"2"}"#
        );
    }

    #[test]
    fn into_response_restores_status_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/html"));
        headers.insert("etag", HeaderValue::from_static("\"v1\""));
        let entry = CacheEntry::new(
            StatusCode::ACCEPTED,
            HeaderBag::from_header_map(&headers),
            b"<p>hi</p>",
        )
        .unwrap();

        let stored = entry.to_json().unwrap();
        let response =
            CacheEntry::from_json(&stored).unwrap().into_response().unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers(), &headers);
        assert_eq!(response.body().as_ref(), b"<p>hi</p>");
    }
}
