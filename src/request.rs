use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use serde::Serialize;

use crate::Result;
use crate::error::Error;
use crate::util::{join_base_path, parse_header_name, parse_header_value};

/// Mutable request under construction, owned by the Serialize and Build stages.
#[derive(Clone, Debug)]
pub struct HttpRequestBuilder {
    method: Method,
    endpoint: Option<String>,
    path: String,
    query_pairs: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpRequestBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            endpoint: None,
            path: "/".to_owned(),
            query_pairs: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    pub fn path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = path.into();
        self
    }

    pub fn endpoint(&mut self, endpoint: impl Into<String>) -> &mut Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn query_pair(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = body.into();
        self
    }

    pub fn json<T>(&mut self, value: &T) -> Result<&mut Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value).map_err(Error::serialize)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Bytes::from(body);
        Ok(self)
    }

    pub fn current_method(&self) -> &Method {
        &self.method
    }

    pub fn current_endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn current_path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn current_body(&self) -> &Bytes {
        &self.body
    }

    pub fn build(self) -> Result<HttpRequest> {
        let target = match &self.endpoint {
            Some(endpoint) if !is_absolute(&self.path) => join_base_path(endpoint, &self.path),
            _ => self.path.clone(),
        };
        let target = append_query_pairs(&target, &self.query_pairs);
        let uri: Uri = target
            .parse()
            .map_err(|_| Error::InvalidUri { uri: target.clone() })?;

        let mut headers = self.headers;
        if !headers.contains_key(HOST)
            && let Some(authority) = uri.authority()
        {
            let value = parse_header_value(HOST.as_str(), authority.as_str())?;
            headers.insert(HOST, value);
        }

        Ok(HttpRequest {
            method: self.method,
            uri,
            headers,
            body: self.body,
        })
    }
}

impl Default for HttpRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire-ready request handed to Finalize. Cloning is cheap: the body is
/// reference counted, so every retry attempt starts from the same bytes.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn host(&self) -> Option<&str> {
        self.uri.host()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_http(self) -> Result<http::Request<Bytes>> {
        let mut request = http::Request::builder()
            .method(self.method)
            .uri(self.uri)
            .body(self.body)
            .map_err(|source| Error::RequestBuild { source })?;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}

fn is_absolute(path: &str) -> bool {
    let lowered = path.get(..8).unwrap_or(path).to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn append_query_pairs(target: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return target.to_owned();
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in query_pairs {
        serializer.append_pair(name, value);
    }
    let query = serializer.finish();
    let separator = if target.contains('?') { '&' } else { '?' };
    format!("{target}{separator}{query}")
}
