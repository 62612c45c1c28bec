//! Request parameters as one nested tree.
//!
//! Route parameters, the query string and the body all land in a single
//! [`Params`] tree. Form-style keys use brackets to describe nesting:
//!
//! | key                  | result                                  |
//! |----------------------|-----------------------------------------|
//! | `foo=bar`            | `{foo: "bar"}`                          |
//! | `foo[]=a&foo[]=b`    | `{foo: ["a", "b"]}`                     |
//! | `foo[bar]=baz`       | `{foo: {bar: "baz"}}`                   |
//! | `foo[bar][]=a`       | `{foo: {bar: ["a"]}}`                   |
//!
//! A key that does not decompose cleanly (`foo[bar][][baz]`, `a[b`, `[x]`) is
//! kept whole as a flat key. Repeated scalar keys keep the last value.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::error::ParseError;
use crate::request::Request;

/// Largest multipart body the default parser accepts (5 MiB).
pub const DEFAULT_MULTIPART_LIMIT: usize = 5 * 1024 * 1024;

const ARRAY_MARKER: &str = "[]";

// ── Value / Params ───────────────────────────────────────────────────────────

/// One node of the parameter tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Map(Params),
    /// JSON that has no form equivalent: numbers (exact text preserved),
    /// booleans, null, arrays holding anything but strings.
    Json(serde_json::Value),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Params> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value as J;

        match value {
            J::String(s) => Self::Str(s),
            J::Object(obj) => Self::Map(Params(
                obj.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect(),
            )),
            J::Array(items) if items.iter().all(J::is_string) => Self::List(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        J::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            other => Self::Json(other),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::Str(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::Str(s) }
}

impl From<Params> for Value {
    fn from(p: Params) -> Self { Self::Map(p) }
}

impl<const N: usize> From<[&str; N]> for Value {
    fn from(items: [&str; N]) -> Self {
        Self::List(items.iter().map(|s| (*s).to_owned()).collect())
    }
}

/// Ordered parameter tree. Iteration follows first insertion.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(IndexMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Scalar lookup; `None` when absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(Value::as_list)
    }

    pub fn get_map(&self, key: &str) -> Option<&Params> {
        self.get(key).and_then(Value::as_map)
    }

    /// Sets a top-level key, replacing any existing value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Writes `value` at `path`, creating nested maps along the way.
    ///
    /// Intermediate keys holding something other than a map are replaced by
    /// an empty map. A trailing array marker appends to the list at the
    /// parent key; otherwise the value overwrites.
    pub fn set_nested(&mut self, path: &KeyPath, value: impl Into<String>) {
        let value = value.into();
        let mut tree = self;
        let mut key = path.root.as_str();
        for next in &path.nested {
            tree = tree.child_map(key);
            key = next;
        }

        if path.append {
            let slot = tree.0.entry(key.to_owned()).or_insert_with(|| Value::List(Vec::new()));
            match slot {
                Value::List(list) => list.push(value),
                other => *other = Value::List(vec![value]),
            }
        } else {
            tree.0.insert(key.to_owned(), Value::Str(value));
        }
    }

    /// Merges raw `key=value` pairs, decomposing each key.
    pub fn merge_pairs<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in pairs {
            self.set_nested(&KeyPath::parse(key.as_ref()), value);
        }
    }

    fn child_map(&mut self, key: &str) -> &mut Params {
        let slot = self.0.entry(key.to_owned()).or_insert_with(|| Value::Map(Params::new()));
        if !matches!(slot, Value::Map(_)) {
            *slot = Value::Map(Params::new());
        }
        match slot {
            Value::Map(map) => map,
            _ => unreachable!("slot holds a map"),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ── KeyPath ──────────────────────────────────────────────────────────────────

/// A bracketed parameter key split into its segments.
///
/// The first segment is always a plain key; the array marker can only be
/// last, which is why it is a flag rather than a segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPath {
    root: String,
    nested: Vec<String>,
    append: bool,
}

impl KeyPath {
    /// Decomposes `key`. Never fails: keys that are not well-formed bracket
    /// paths come back as a single verbatim segment.
    pub fn parse(key: &str) -> Self {
        Self::split(key).unwrap_or_else(|| Self::verbatim(key))
    }

    fn verbatim(key: &str) -> Self {
        Self { root: key.to_owned(), nested: Vec::new(), append: false }
    }

    fn split(key: &str) -> Option<Self> {
        let head = word_len(key);
        if head == 0 {
            return None;
        }

        let mut path = Self::verbatim(&key[..head]);
        let mut rest = &key[head..];
        while !rest.is_empty() {
            let inner = rest.strip_prefix('[')?;
            let len = word_len(inner);
            if inner.as_bytes().get(len) != Some(&b']') {
                return None;
            }
            rest = &inner[len + 1..];

            if len == 0 {
                // `[]` is only meaningful at the very end.
                if !rest.is_empty() {
                    return None;
                }
                path.append = true;
            } else {
                path.nested.push(inner[..len].to_owned());
            }
        }
        Some(path)
    }

    /// The segments in order, with the array marker rendered as `"[]"`.
    pub fn segments(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.nested.len() + 2);
        out.push(self.root.as_str());
        out.extend(self.nested.iter().map(String::as_str));
        if self.append {
            out.push(ARRAY_MARKER);
        }
        out
    }

    pub fn is_append(&self) -> bool {
        self.append
    }
}

/// Length of the leading run of `[A-Za-z0-9_]`.
fn word_len(s: &str) -> usize {
    s.bytes().take_while(|b| b.is_ascii_alphanumeric() || *b == b'_').count()
}

// ── ParamParser ──────────────────────────────────────────────────────────────

/// Builds [`Params`] from a request.
///
/// Sources are applied in order: route parameters, query string, body. The
/// body is read according to its media type; anything other than JSON,
/// URL-encoded or multipart form data is ignored.
#[derive(Clone, Debug)]
pub struct ParamParser {
    multipart_limit: usize,
}

impl Default for ParamParser {
    fn default() -> Self {
        Self { multipart_limit: DEFAULT_MULTIPART_LIMIT }
    }
}

impl ParamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps multipart bodies at `limit` bytes.
    pub fn multipart_limit(mut self, limit: usize) -> Self {
        self.multipart_limit = limit;
        self
    }

    pub async fn parse(&self, req: &Request) -> Result<Params, ParseError> {
        let mut params = Params::new();

        for (key, value) in req.params() {
            params.insert(key.as_str(), value.as_str());
        }

        let query: Vec<(String, String)> = serde_urlencoded::from_str(req.query())?;
        params.merge_pairs(query);

        let Some(content_type) = req.content_type() else {
            return Ok(params);
        };
        let Ok(mime) = content_type.parse::<mime::Mime>() else {
            debug!(content_type, "unparseable content type, body ignored");
            return Ok(params);
        };

        match mime.essence_str() {
            "application/json" => merge_json(&mut params, req.body())?,
            "application/x-www-form-urlencoded" => {
                let form: Vec<(String, String)> = serde_urlencoded::from_bytes(req.body())?;
                params.merge_pairs(form);
            }
            "multipart/form-data" => {
                let fields = self.read_multipart(content_type, req.body().clone()).await?;
                params.merge_pairs(fields);
            }
            _ => debug!(content_type, "body ignored"),
        }

        Ok(params)
    }

    /// Collects the non-file fields of a multipart body.
    async fn read_multipart(
        &self,
        content_type: &str,
        body: Bytes,
    ) -> Result<Vec<(String, String)>, ParseError> {
        if body.len() > self.multipart_limit {
            return Err(ParseError::TooLarge { limit: self.multipart_limit });
        }

        let boundary = multer::parse_boundary(content_type)?;
        let constraints = multer::Constraints::new()
            .size_limit(multer::SizeLimit::new().whole_stream(self.multipart_limit as u64));
        let stream = futures_util::stream::once(async move { Ok::<_, std::io::Error>(body) });
        let mut multipart = multer::Multipart::with_constraints(stream, boundary, constraints);

        let mut fields = Vec::new();
        while let Some(field) = multipart.next_field().await? {
            if field.file_name().is_some() {
                continue;
            }
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            fields.push((name, field.text().await?));
        }
        Ok(fields)
    }
}

/// Parses with the default [`ParamParser`].
pub async fn parse_params(req: &Request) -> Result<Params, ParseError> {
    ParamParser::default().parse(req).await
}

fn merge_json(params: &mut Params, body: &[u8]) -> Result<(), ParseError> {
    match serde_json::from_slice(body)? {
        serde_json::Value::Object(obj) => {
            for (key, value) in obj {
                params.0.insert(key, Value::from_json(value));
            }
            Ok(())
        }
        _ => Err(ParseError::JsonNotObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, header};

    fn post(uri: &str, content_type: &str, body: impl Into<Bytes>) -> Request {
        Request::new(Method::POST, uri.parse().unwrap(), HeaderMap::new(), body)
            .with_header(header::CONTENT_TYPE, content_type)
    }

    const NESTED_FORM: &str = "a=1&b=2&c[]=3&c[]=4&d[e]=5&d[f]=6&g[h][i]=7&g[h][j]=8\
        &k[l][m][]=9&k[l][m][]=10&k[l][n][]=11&k[l][n][]=12";

    fn nested_expected() -> Params {
        Params::from_iter([
            ("a", Value::from("1")),
            ("b", Value::from("2")),
            ("c", Value::from(["3", "4"])),
            ("d", Value::from(Params::from_iter([("e", "5"), ("f", "6")]))),
            (
                "g",
                Value::from(Params::from_iter([(
                    "h",
                    Params::from_iter([("i", "7"), ("j", "8")]),
                )])),
            ),
            (
                "k",
                Value::from(Params::from_iter([(
                    "l",
                    Params::from_iter([
                        ("m", Value::from(["9", "10"])),
                        ("n", Value::from(["11", "12"])),
                    ]),
                )])),
            ),
        ])
    }

    // ── KeyPath ──────────────────────────────────────────────────────────────

    #[test]
    fn key_path_segments() {
        let cases: &[(&str, &[&str])] = &[
            ("", &[""]),
            ("foo", &["foo"]),
            ("foo[]", &["foo", "[]"]),
            ("foo[bar]", &["foo", "bar"]),
            ("foo[bar][baz]", &["foo", "bar", "baz"]),
            ("foo[bar][baz][]", &["foo", "bar", "baz", "[]"]),
        ];
        for (key, expected) in cases {
            assert_eq!(KeyPath::parse(key).segments(), *expected, "key `{key}`");
        }
    }

    #[test]
    fn array_marker_before_the_end_keeps_the_key_verbatim() {
        let path = KeyPath::parse("foo[bar][][baz]");
        assert_eq!(path.segments(), ["foo[bar][][baz]"]);
        assert!(!path.is_append());
    }

    #[test]
    fn malformed_brackets_keep_the_key_verbatim() {
        for key in ["a[b", "[x]", "a[b]c", "a[b-c]", "a-b", "a[[b]]"] {
            assert_eq!(KeyPath::parse(key).segments(), [key], "key `{key}`");
        }
    }

    // ── set_nested ───────────────────────────────────────────────────────────

    #[test]
    fn scalar_keys_keep_the_last_value() {
        let mut params = Params::new();
        params.merge_pairs([("a", "1"), ("a", "2"), ("a", "3")]);
        assert_eq!(params.get_str("a"), Some("3"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn array_keys_accumulate_in_order() {
        let mut params = Params::new();
        params.merge_pairs([("c[]", "3"), ("x", "y"), ("c[]", "4")]);
        assert_eq!(params.get_list("c"), Some(&["3".to_owned(), "4".to_owned()][..]));
    }

    #[test]
    fn nested_key_replaces_scalar_in_the_way() {
        let mut params = Params::new();
        params.merge_pairs([("d", "flat"), ("d[e]", "5")]);
        assert_eq!(params.get_map("d").and_then(|d| d.get_str("e")), Some("5"));
    }

    #[test]
    fn array_key_replaces_scalar() {
        let mut params = Params::new();
        params.merge_pairs([("c", "flat"), ("c[]", "1")]);
        assert_eq!(params.get_list("c"), Some(&["1".to_owned()][..]));
    }

    // ── ParamParser ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn query_parameters() {
        let req = Request::get(&format!("/somewhere?{}", NESTED_FORM.replace('[', "%5B").replace(']', "%5D")));
        let params = parse_params(&req).await.unwrap();
        assert_eq!(params, nested_expected());
    }

    #[tokio::test]
    async fn simple_query_pairs() {
        let params = parse_params(&Request::get("/?a=1&b=2")).await.unwrap();
        assert_eq!(params, Params::from_iter([("a", "1"), ("b", "2")]));
    }

    #[tokio::test]
    async fn form_url_encoded_body() {
        let req = post("/somewhere", "application/x-www-form-urlencoded", NESTED_FORM);
        let params = parse_params(&req).await.unwrap();
        assert_eq!(params, nested_expected());
    }

    #[tokio::test]
    async fn route_params_come_first_and_query_overrides() {
        let req = Request::get("/walks/7?id=8&page=2")
            .with_params(vec![("id".to_owned(), "7".to_owned())]);
        let params = parse_params(&req).await.unwrap();
        assert_eq!(params.get_str("id"), Some("8"));
        assert_eq!(params.iter().map(|(k, _)| k).collect::<Vec<_>>(), ["id", "page"]);
    }

    #[tokio::test]
    async fn json_body_merges_into_root() {
        let req = post("/?a=query", "application/json", r#"{"a":"1","b":"2"}"#);
        let params = parse_params(&req).await.unwrap();
        assert_eq!(params, Params::from_iter([("a", "1"), ("b", "2")]));
    }

    #[tokio::test]
    async fn json_numbers_keep_their_exact_text() {
        let req = post("/", "application/json; charset=utf-8", r#"{"n":12345678901234567890.000000000001}"#);
        let params = parse_params(&req).await.unwrap();
        let Some(Value::Json(serde_json::Value::Number(n))) = params.get("n") else {
            panic!("expected a number, got {:?}", params.get("n"));
        };
        assert_eq!(n.to_string(), "12345678901234567890.000000000001");
    }

    #[tokio::test]
    async fn json_nested_values() {
        let req = post("/", "application/json", r#"{"d":{"e":"5"},"c":["3","4"],"ok":true}"#);
        let params = parse_params(&req).await.unwrap();
        assert_eq!(params.get_map("d").and_then(|d| d.get_str("e")), Some("5"));
        assert_eq!(params.get_list("c").map(<[String]>::len), Some(2));
        assert_eq!(params.get("ok"), Some(&Value::Json(serde_json::Value::Bool(true))));
    }

    #[tokio::test]
    async fn malformed_json_is_an_error() {
        let req = post("/", "application/json", "{not json");
        assert!(matches!(parse_params(&req).await, Err(ParseError::Json(_))));
    }

    #[tokio::test]
    async fn json_array_body_is_an_error() {
        let req = post("/", "application/json", r#"["a"]"#);
        assert!(matches!(parse_params(&req).await, Err(ParseError::JsonNotObject)));
    }

    #[tokio::test]
    async fn unknown_content_type_ignores_body() {
        let req = post("/?a=1", "text/plain", "b=2");
        let params = parse_params(&req).await.unwrap();
        assert_eq!(params, Params::from_iter([("a", "1")]));
    }

    fn multipart_body() -> String {
        [
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
            "Morning walk\r\n",
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"tags[]\"\r\n\r\n",
            "park\r\n",
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"tags[]\"\r\n\r\n",
            "river\r\n",
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"photo\"; filename=\"walk.png\"\r\n",
            "Content-Type: image/png\r\n\r\n",
            "PNGDATA\r\n",
            "--XBOUNDARY--\r\n",
        ]
        .concat()
    }

    #[tokio::test]
    async fn multipart_skips_file_parts() {
        let req = post("/", "multipart/form-data; boundary=XBOUNDARY", multipart_body());
        let params = parse_params(&req).await.unwrap();
        assert_eq!(params.get_str("title"), Some("Morning walk"));
        assert_eq!(params.get_list("tags"), Some(&["park".to_owned(), "river".to_owned()][..]));
        assert!(params.get("photo").is_none());
    }

    #[tokio::test]
    async fn multipart_over_the_limit_is_rejected() {
        let req = post("/", "multipart/form-data; boundary=XBOUNDARY", multipart_body());
        let parser = ParamParser::new().multipart_limit(16);
        assert!(matches!(parser.parse(&req).await, Err(ParseError::TooLarge { limit: 16 })));
    }

    #[tokio::test]
    async fn multipart_without_boundary_is_an_error() {
        let req = post("/", "multipart/form-data", multipart_body());
        assert!(matches!(parse_params(&req).await, Err(ParseError::Multipart(_))));
    }
}
