use crate::proxy::error::ParseError;

/// A request target split into its URL components.
///
/// Handles the four request-target forms a forward proxy sees: absolute-form
/// (`http://host:port/path?query#fragment`), origin-form (`/path?query`),
/// authority-form (`host:port`, used by CONNECT) and asterisk-form (`*`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTarget {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl RequestTarget {
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        if value.is_empty() || value.chars().any(|c| c.is_ascii_whitespace()) {
            return Err(ParseError::InvalidTarget(value.to_string()));
        }
        if value == "*" {
            return Ok(Self {
                path: "*".to_string(),
                ..Self::default()
            });
        }
        if value.starts_with('/') {
            return Ok(Self::with_path(value));
        }

        if let Some((scheme, rest)) = value.split_once("://") {
            if scheme.is_empty()
                || !scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            {
                return Err(ParseError::InvalidTarget(value.to_string()));
            }
            let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
            let (authority, tail) = rest.split_at(end);
            let (host, port) = parse_authority(authority)
                .map_err(|_| ParseError::InvalidTarget(value.to_string()))?;
            let mut target = Self::with_path(tail);
            target.scheme = Some(scheme.to_ascii_lowercase());
            target.host = host;
            target.port = port;
            return Ok(target);
        }

        let (host, port) =
            parse_authority(value).map_err(|_| ParseError::InvalidTarget(value.to_string()))?;
        Ok(Self {
            host,
            port,
            ..Self::default()
        })
    }

    fn with_path(tail: &str) -> Self {
        let (rest, fragment) = tail.split_once('#').unwrap_or((tail, ""));
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        Self {
            path: path.to_string(),
            query: query.to_string(),
            fragment: fragment.to_string(),
            ..Self::default()
        }
    }

    /// The target as sent to an origin server: path (defaulting to `/`),
    /// followed by the query and fragment when present.
    pub fn request_uri(&self) -> String {
        let mut uri = if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.clone()
        };
        if !self.query.is_empty() {
            uri.push('?');
            uri.push_str(&self.query);
        }
        if !self.fragment.is_empty() {
            uri.push('#');
            uri.push_str(&self.fragment);
        }
        uri
    }
}

/// Parse `[userinfo@]host[:port]` into a lowercased host and optional port.
///
/// IPv6 literals must be bracketed; the brackets are stripped from the
/// returned host. An empty host yields `None`.
pub fn parse_authority(value: &str) -> Result<(Option<String>, Option<u16>), ParseError> {
    let invalid = || ParseError::InvalidTarget(value.to_string());
    let authority = value
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(value);

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']').ok_or_else(invalid)?;
        let port = match rest {
            "" => None,
            other => Some(other.strip_prefix(':').ok_or_else(invalid)?),
        };
        (host, port)
    } else {
        match authority.split_once(':') {
            Some((host, port)) => {
                if port.contains(':') {
                    return Err(invalid());
                }
                (host, Some(port))
            }
            None => (authority, None),
        }
    };

    let port = match port {
        None | Some("") => None,
        Some(port) => Some(port.parse::<u16>().map_err(|_| invalid())?),
    };
    let host = (!host.is_empty()).then(|| host.to_ascii_lowercase());
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_form() {
        let target =
            RequestTarget::parse("http://Example.COM:8080/a/b?x=1&y=2#frag").expect("parse");
        assert_eq!(target.scheme.as_deref(), Some("http"));
        assert_eq!(target.host.as_deref(), Some("example.com"));
        assert_eq!(target.port, Some(8080));
        assert_eq!(target.path, "/a/b");
        assert_eq!(target.query, "x=1&y=2");
        assert_eq!(target.fragment, "frag");
        assert_eq!(target.request_uri(), "/a/b?x=1&y=2#frag");
    }

    #[test]
    fn absolute_form_without_path_defaults_to_root() {
        let target = RequestTarget::parse("http://example.com").expect("parse");
        assert_eq!(target.host.as_deref(), Some("example.com"));
        assert_eq!(target.port, None);
        assert_eq!(target.request_uri(), "/");

        let target = RequestTarget::parse("http://example.com?q=1").expect("parse");
        assert_eq!(target.request_uri(), "/?q=1");
    }

    #[test]
    fn parses_origin_form() {
        let target = RequestTarget::parse("/index.html?lang=en").expect("parse");
        assert_eq!(target.host, None);
        assert_eq!(target.path, "/index.html");
        assert_eq!(target.request_uri(), "/index.html?lang=en");
    }

    #[test]
    fn parses_authority_form() {
        let target = RequestTarget::parse("example.com:443").expect("parse");
        assert_eq!(target.scheme, None);
        assert_eq!(target.host.as_deref(), Some("example.com"));
        assert_eq!(target.port, Some(443));
    }

    #[test]
    fn parses_bracketed_ipv6_authority() {
        let target = RequestTarget::parse("[2001:db8::1]:8443").expect("parse");
        assert_eq!(target.host.as_deref(), Some("2001:db8::1"));
        assert_eq!(target.port, Some(8443));

        let target = RequestTarget::parse("http://[::1]/x").expect("parse");
        assert_eq!(target.host.as_deref(), Some("::1"));
        assert_eq!(target.port, None);
    }

    #[test]
    fn strips_userinfo() {
        let target = RequestTarget::parse("http://user:pw@example.com:81/").expect("parse");
        assert_eq!(target.host.as_deref(), Some("example.com"));
        assert_eq!(target.port, Some(81));
    }

    #[test]
    fn asterisk_form_is_kept_verbatim() {
        let target = RequestTarget::parse("*").expect("parse");
        assert_eq!(target.request_uri(), "*");
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(matches!(
            RequestTarget::parse("example.com:http"),
            Err(ParseError::InvalidTarget(_))
        ));
        assert!(matches!(
            RequestTarget::parse("http://example.com:99999/"),
            Err(ParseError::InvalidTarget(_))
        ));
    }

    #[test]
    fn rejects_unbracketed_ipv6() {
        assert!(RequestTarget::parse("2001:db8::1:443").is_err());
    }

    #[test]
    fn authority_without_port() {
        assert_eq!(
            parse_authority("Example.com").unwrap(),
            (Some("example.com".to_string()), None)
        );
        assert_eq!(parse_authority("example.com:").unwrap().1, None);
        assert_eq!(parse_authority("").unwrap(), (None, None));
    }
}
