//! Git remote URL parsing.

use crate::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Git,
    Ssh,
    Http,
    Https,
    File,
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Git => "git",
            Self::Ssh => "ssh",
            Self::Http => "http",
            Self::Https => "https",
            Self::File => "file",
        })
    }
}

impl Scheme {
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Git => Some(9418),
            Self::Ssh => Some(22),
            Self::Http => Some(80),
            Self::Https => Some(443),
            Self::File => None,
        }
    }
}

/// A parsed remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
}

impl GitUrl {
    /// Parse `scheme://…` URLs, SCP-like `user@host:path`, and local paths.
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        if let Some((scheme_str, rest)) = input.split_once("://") {
            let scheme = match scheme_str {
                "git" => Scheme::Git,
                "ssh" => Scheme::Ssh,
                "http" => Scheme::Http,
                "https" => Scheme::Https,
                "file" => Scheme::File,
                other => return Err(TransportError::UnsupportedScheme(other.to_string())),
            };
            if scheme == Scheme::File {
                return Ok(Self {
                    scheme,
                    user: None,
                    host: None,
                    port: None,
                    path: rest.to_string(),
                });
            }

            let (authority, path) = match rest.find('/') {
                Some(pos) => (&rest[..pos], rest[pos..].to_string()),
                None => (rest, String::from("/")),
            };
            let (user, host_port) = match authority.split_once('@') {
                Some((u, hp)) => (Some(u.to_string()), hp),
                None => (None, authority),
            };
            let (host, port) = match host_port.rsplit_once(':') {
                Some((h, p)) => {
                    let port: u16 = p.parse().map_err(|_| {
                        TransportError::InvalidUrl(format!("bad port in '{input}'"))
                    })?;
                    (h.to_string(), Some(port))
                }
                None => (host_port.to_string(), None),
            };
            if host.is_empty() {
                return Err(TransportError::InvalidUrl(format!("no host in '{input}'")));
            }
            return Ok(Self {
                scheme,
                user,
                host: Some(host),
                port,
                path,
            });
        }

        // SCP-like: user@host:path (a colon before any slash).
        if let Some(colon) = input.find(':') {
            if !input[..colon].contains('/') {
                let (user_host, path) = input.split_at(colon);
                let path = &path[1..];
                let (user, host) = match user_host.split_once('@') {
                    Some((u, h)) => (Some(u.to_string()), h.to_string()),
                    None => (None, user_host.to_string()),
                };
                if !host.is_empty() && !path.is_empty() {
                    return Ok(Self {
                        scheme: Scheme::Ssh,
                        user,
                        host: Some(host),
                        port: None,
                        path: path.to_string(),
                    });
                }
            }
        }

        // Bare local path.
        Ok(Self {
            scheme: Scheme::File,
            user: None,
            host: None,
            port: None,
            path: input.to_string(),
        })
    }

    /// Port to dial, falling back to the scheme default.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.scheme.default_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_url() {
        let url = GitUrl::parse("https://example.com/owner/repo.git").unwrap();
        assert_eq!(url.scheme, Scheme::Https);
        assert_eq!(url.host.as_deref(), Some("example.com"));
        assert_eq!(url.path, "/owner/repo.git");
        assert_eq!(url.effective_port(), Some(443));
    }

    #[test]
    fn git_url_with_port() {
        let url = GitUrl::parse("git://example.com:9419/repo").unwrap();
        assert_eq!(url.scheme, Scheme::Git);
        assert_eq!(url.port, Some(9419));
    }

    #[test]
    fn scp_like_ssh() {
        let url = GitUrl::parse("git@example.com:owner/repo.git").unwrap();
        assert_eq!(url.scheme, Scheme::Ssh);
        assert_eq!(url.user.as_deref(), Some("git"));
        assert_eq!(url.host.as_deref(), Some("example.com"));
        assert_eq!(url.path, "owner/repo.git");
    }

    #[test]
    fn explicit_ssh_url() {
        let url = GitUrl::parse("ssh://git@example.com:2222/repo.git").unwrap();
        assert_eq!(url.scheme, Scheme::Ssh);
        assert_eq!(url.port, Some(2222));
        assert_eq!(url.path, "/repo.git");
    }

    #[test]
    fn local_paths() {
        let url = GitUrl::parse("/srv/git/repo.git").unwrap();
        assert_eq!(url.scheme, Scheme::File);
        assert_eq!(url.path, "/srv/git/repo.git");

        let url = GitUrl::parse("file:///srv/git/repo.git").unwrap();
        assert_eq!(url.scheme, Scheme::File);
        assert_eq!(url.path, "/srv/git/repo.git");
    }

    #[test]
    fn relative_path_with_slash_before_colon_is_local() {
        let url = GitUrl::parse("./some:dir/repo").unwrap();
        assert_eq!(url.scheme, Scheme::File);
    }

    #[test]
    fn bad_inputs() {
        assert!(GitUrl::parse("ftp://example.com/x").is_err());
        assert!(GitUrl::parse("https://example.com:notaport/x").is_err());
    }
}
