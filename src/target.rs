//! Request templates: the closed HTTP [`Method`] set and the [`Target`]
//! built from a request chunk.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// The methods a script may use. The set is closed on purpose: the
/// aggregator keys its per-method breakdown on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
    Options,
    Head,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Get,
        Method::Post,
        Method::Patch,
        Method::Delete,
        Method::Options,
        Method::Head,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "HEAD" => Ok(Method::Head),
            _ => Err(()),
        }
    }
}

/// An immutable HTTP request template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Target {
    /// Parse the text of a request chunk.
    ///
    /// Grammar: `<METHOD> <URL>` on the first non-blank line, then
    /// `Name:Value` header lines, then optionally a single `@<path>` line
    /// loading the body from disk. The body line must be last.
    pub fn from_chunk(text: &str) -> Result<Target, Error> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let first = lines
            .next()
            .ok_or_else(|| Error::parse("empty request chunk"))?;

        let mut words = first.split_whitespace();
        let method_tok = words.next().unwrap_or_default();
        let method: Method = method_tok
            .parse()
            .map_err(|_| Error::parse(format!("unknown method {method_tok:?}")))?;
        let url = words
            .next()
            .ok_or_else(|| Error::parse(format!("missing URL in {first:?}")))?
            .to_owned();
        if !url.starts_with('/') {
            Url::parse(&url).map_err(|err| Error::parse(format!("bad URL {url:?}: {err}")))?;
        }

        let mut headers = Vec::new();
        let mut body = Bytes::new();
        let mut have_body = false;
        for line in lines {
            if have_body {
                return Err(Error::parse(format!(
                    "line {line:?} after the @body line; the body must be last"
                )));
            }
            if let Some(path) = line.strip_prefix('@') {
                body = read_body(Path::new(path))?;
                have_body = true;
            } else {
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| Error::parse(format!("malformed header line {line:?}")))?;
                headers.push((name.to_owned(), value.trim_start().to_owned()));
            }
        }

        Ok(Target {
            method,
            url,
            headers,
            body,
        })
    }
}

fn read_body(path: &Path) -> Result<Bytes, Error> {
    std::fs::read(path)
        .map(Bytes::from)
        .map_err(|source| Error::BodyFile {
            path: path.to_owned(),
            source,
        })
}
