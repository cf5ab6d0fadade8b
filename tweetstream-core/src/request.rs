//! Stream request descriptor, endpoint catalogue and HTTP/1.1 serialization.

use std::fmt;

use url::form_urlencoded;

pub const HTTPS_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical streams with fixed host and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Public statuses matching `follow`/`track`/`locations`.
    Filter,
    /// Random sample of public statuses.
    Sample,
    /// All public statuses.
    Firehose,
    /// Single-user stream.
    User,
    /// Multi-user stream.
    Site,
}

impl Endpoint {
    pub fn method(self) -> Method {
        match self {
            Self::Filter => Method::Post,
            _ => Method::Get,
        }
    }

    pub fn host(self) -> &'static str {
        match self {
            Self::Filter | Self::Sample | Self::Firehose => "stream.twitter.com",
            Self::User => "userstream.twitter.com",
            Self::Site => "sitestream.twitter.com",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::Filter => "/1.1/statuses/filter.json",
            Self::Sample => "/1.1/statuses/sample.json",
            Self::Firehose => "/1.1/statuses/firehose.json",
            Self::User => "/1.1/user.json",
            Self::Site => "/1.1/site.json",
        }
    }
}

/// Longitude/latitude box for the `locations` parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }
}

/// Everything needed to open one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub method: Method,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub params: Vec<(String, String)>,
    /// Extra headers; `Host`, `Authorization`, `User-Agent` and body headers are added on encode.
    pub headers: Vec<(String, String)>,
}

impl StreamRequest {
    pub fn new(method: Method, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            host: host.into(),
            port: HTTPS_PORT,
            path: path.into(),
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn endpoint(endpoint: Endpoint) -> Self {
        Self::new(endpoint.method(), endpoint.host(), endpoint.path())
    }

    pub fn filter() -> Self {
        Self::endpoint(Endpoint::Filter)
    }

    pub fn sample() -> Self {
        Self::endpoint(Endpoint::Sample)
    }

    pub fn firehose() -> Self {
        Self::endpoint(Endpoint::Firehose)
    }

    pub fn user() -> Self {
        Self::endpoint(Endpoint::User)
    }

    /// Site stream for the given account ids.
    pub fn site(follow: &[u64]) -> Self {
        Self::endpoint(Endpoint::Site).follow(follow)
    }

    /// Point at another host (proxy, test server).
    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn follow(self, ids: &[u64]) -> Self {
        let joined = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
        self.param("follow", joined)
    }

    pub fn track<S: AsRef<str>>(self, terms: &[S]) -> Self {
        let joined = terms.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",");
        self.param("track", joined)
    }

    pub fn locations(self, boxes: &[BoundingBox]) -> Self {
        let joined = boxes
            .iter()
            .flat_map(|b| [b.west, b.south, b.east, b.north])
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.param("locations", joined)
    }

    /// `application/x-www-form-urlencoded` parameters.
    pub fn encoded_params(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }

    /// Request target: path, plus the query string for GET.
    pub fn target(&self) -> String {
        if self.method == Method::Get && !self.params.is_empty() {
            format!("{}?{}", self.path, self.encoded_params())
        } else {
            self.path.clone()
        }
    }

    /// Base URL without parameters, as signed by authorizers.
    pub fn url(&self) -> String {
        if self.port == HTTPS_PORT {
            format!("https://{}{}", self.host, self.path)
        } else {
            format!("https://{}:{}{}", self.host, self.port, self.path)
        }
    }

    fn host_header(&self) -> String {
        if self.port == HTTPS_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Serialize as an HTTP/1.1 request.
    pub fn encode(&self, authorization: &str, user_agent: &str) -> Vec<u8> {
        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nAuthorization: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: keep-alive\r\n",
            self.method,
            self.target(),
            self.host_header(),
            authorization,
            user_agent
        );
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        let body = match self.method {
            Method::Post => self.encoded_params(),
            Method::Get => String::new(),
        };
        if self.method == Method::Post {
            head.push_str("Content-Type: application/x-www-form-urlencoded\r\n");
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(body.as_bytes());
        out
    }
}
