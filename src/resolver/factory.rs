//! Source dispatch: picks the resolver kind for an endpoint's source.
//!
//! Rules are tried in order:
//!
//! | Source                                          | Resolver                     |
//! |-------------------------------------------------|------------------------------|
//! | `git://`, `git+ssh://`, `git+https://`, `*.git`, `git@host:` | GitHub or remote git |
//! | `svn://`, `svn+ssh://`, `svn+http(s)://`, `svn+file://` | Subversion            |
//! | `http://`, `https://`                           | URL                          |
//! | `./`, `../`, `~/`, absolute paths               | local git, svn or filesystem |
//! | `owner/repo`, `@host:owner/repo`                | expanded, then dispatched    |
//! | anything else                                   | registry lookup              |
//!
//! Errors raised while constructing the chosen resolver (such as a
//! filesystem source given a version target) propagate unchanged.

use anyhow::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use super::{Resolver, ResolverContext, ResolverKind};
use crate::core::ResolveError;
use crate::endpoint::Endpoint;
use crate::registry::Registry;
use crate::utils::fs::absolutize;

static GIT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^git(\+(ssh|https?))?://|\.git/?$|^git@").expect("git pattern is valid")
});

static GITHUB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:@|://)github\.com[:/]([^/\s]+?)/([^/\s]+?)(?:\.git)?/?$").expect("github pattern is valid")
});

static SVN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^svn(\+(ssh|https?|file))?://").expect("svn pattern is valid"));

static HTTP_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://").expect("http pattern is valid"));

static LOCAL_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\.\.?|~)[/\\]").expect("path pattern is valid"));

static HOST_SHORTHAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@([\w.\-]+):([\w.\-]+)/([\w.\-]+)$").expect("host shorthand pattern is valid")
});

static SHORTHAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w.\-]+)/([\w.\-]+)$").expect("shorthand pattern is valid"));

static REGISTRY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.\-]+$").expect("registry name pattern is valid"));

/// Shorthand expansions and registry hops allowed before giving up.
const MAX_REDIRECTS: usize = 4;

/// Outcome of one dispatch step.
#[derive(Debug, PartialEq, Eq)]
enum Dispatch {
    Resolver(ResolverKind, String),
    Expanded(String),
    Lookup(String),
}

pub struct ResolverFactory {
    ctx: ResolverContext,
    registry: Arc<dyn Registry>,
}

impl ResolverFactory {
    pub fn new(ctx: ResolverContext, registry: Arc<dyn Registry>) -> Self {
        Self {
            ctx,
            registry,
        }
    }

    pub fn context(&self) -> &ResolverContext {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Builds the resolver for `endpoint`.
    ///
    /// When the source came from the registry, the returned resolver reports
    /// [`Resolver::is_registry`] and an unnamed endpoint takes the registry key as its name.
    ///
    /// # Errors
    ///
    /// `NO_RESOLVER` when no rule matches, `NOT_FOUND` when the registry has
    /// no entry, and any error from the resolver's constructor.
    pub async fn create(&self, endpoint: &Endpoint) -> Result<Resolver> {
        let mut endpoint = endpoint.clone();
        let mut source = endpoint.source.clone();

        for _ in 0..=MAX_REDIRECTS {
            match self.dispatch(&source)? {
                Dispatch::Resolver(kind, resolved_source) => {
                    tracing::debug!(target: "resolver", "{} dispatched to {}", endpoint, kind.id());
                    let registry = endpoint.registry;
                    let resolver = Resolver::new(kind, &resolved_source, &endpoint, self.ctx.clone())?;
                    return Ok(resolver.from_registry(registry));
                }
                Dispatch::Expanded(url) => source = url,
                Dispatch::Lookup(name) => {
                    let url = self.registry.lookup(&name).await?.ok_or_else(|| ResolveError::NotFound {
                        name: name.clone(),
                    })?;
                    endpoint.registry = true;
                    if endpoint.name.is_none() {
                        endpoint.name = Some(name);
                    }
                    source = url;
                }
            }
        }

        Err(ResolveError::NoResolver {
            locator: endpoint.source,
        }
        .into())
    }

    fn dispatch(&self, source: &str) -> Result<Dispatch> {
        if GIT_URL.is_match(source) {
            let source = source.strip_prefix("git+").unwrap_or(source).to_string();
            if let Some(caps) = GITHUB.captures(&source) {
                let kind = ResolverKind::GitHub {
                    owner: caps[1].to_string(),
                    repo: caps[2].to_string(),
                };
                return Ok(Dispatch::Resolver(kind, source));
            }
            return Ok(Dispatch::Resolver(ResolverKind::GitRemote, source));
        }

        if SVN_URL.is_match(source) {
            let source = normalize_svn(source);
            return Ok(Dispatch::Resolver(ResolverKind::Svn, source));
        }

        if HTTP_URL.is_match(source) {
            return Ok(Dispatch::Resolver(ResolverKind::Url, source.to_string()));
        }

        if let Some(path) = self.local_path(source) {
            return probe_local(source, path);
        }

        if let Some(caps) = HOST_SHORTHAND.captures(source) {
            let url = self.ctx.config.expand_shorthand(Some(&caps[1]), &caps[2], &caps[3]).ok_or_else(|| {
                ResolveError::NoResolver {
                    locator: source.to_string(),
                }
            })?;
            return Ok(Dispatch::Expanded(url));
        }

        if let Some(caps) = SHORTHAND.captures(source) {
            let url = self.ctx.config.expand_shorthand(None, &caps[1], &caps[2]).ok_or_else(|| {
                ResolveError::NoResolver {
                    locator: source.to_string(),
                }
            })?;
            return Ok(Dispatch::Expanded(url));
        }

        if REGISTRY_NAME.is_match(source) {
            return Ok(Dispatch::Lookup(source.to_string()));
        }

        Err(ResolveError::NoResolver {
            locator: source.to_string(),
        }
        .into())
    }

    /// Absolute path for path-like sources: `./`, `../`, `~/` or absolute.
    fn local_path(&self, source: &str) -> Option<PathBuf> {
        let absolute = Path::new(source).is_absolute() || has_drive_prefix(source);
        if !absolute && !LOCAL_PATH.is_match(source) {
            return None;
        }
        let expanded = shellexpand::tilde(source).into_owned();
        Some(absolutize(&self.ctx.config.cwd, Path::new(&expanded)))
    }
}

fn has_drive_prefix(source: &str) -> bool {
    let bytes = source.as_bytes();
    bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && matches!(bytes[2], b'/' | b'\\')
}

/// `svn+http(s)://` and `svn+file://` are plain URLs to the svn client.
fn normalize_svn(source: &str) -> String {
    for scheme in ["http://", "https://", "file://"] {
        if let Some(rest) = source.strip_prefix("svn+").filter(|rest| rest.starts_with(scheme)) {
            return rest.to_string();
        }
    }
    source.to_string()
}

fn probe_local(source: &str, path: PathBuf) -> Result<Dispatch> {
    let display = path.display().to_string();
    if path.join(".git").is_dir() {
        return Ok(Dispatch::Resolver(
            ResolverKind::GitLocal {
                path,
            },
            display,
        ));
    }
    if path.join(".svn").is_dir() {
        return Ok(Dispatch::Resolver(ResolverKind::Svn, format!("file://{display}")));
    }
    if path.exists() {
        return Ok(Dispatch::Resolver(
            ResolverKind::Fs {
                path,
            },
            display,
        ));
    }
    Err(ResolveError::NoResolver {
        locator: source.to_string(),
    }
    .into())
}
