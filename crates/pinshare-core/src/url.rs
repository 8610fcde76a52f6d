//! Mapping between the capability URL and request paths.

use std::net::SocketAddr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped in the file name segment. Besides what a path segment
/// requires this covers brackets and braces, which curl would treat as globs.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// `https://{addr}/{token}/{filename}`, or `https://{addr}/{filename}` when
/// the token is empty. IPv6 addresses come out bracketed.
pub fn share_url(addr: SocketAddr, token: &str, filename: &str) -> String {
    let name = utf8_percent_encode(filename, PATH_SEGMENT);
    if token.is_empty() {
        format!("https://{}/{}", addr, name)
    } else {
        format!("https://{}/{}/{}", addr, token, name)
    }
}

/// The two parts of a request path the server authorizes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRequest {
    pub token: String,
    pub filename: String,
}

impl ShareRequest {
    /// Percent-decode `path` and split it at the last `/`. The directory part,
    /// minus one leading `/`, is the token candidate; the rest is the name.
    pub fn from_path(path: &str) -> Option<Self> {
        let decoded = percent_decode_str(path).decode_utf8().ok()?;
        let (dir, base) = decoded.rsplit_once('/')?;
        let token = dir.strip_prefix('/').unwrap_or(dir);

        Some(Self {
            token: token.to_string(),
            filename: base.to_string(),
        })
    }
}
