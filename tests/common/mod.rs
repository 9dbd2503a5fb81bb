//! Common test utilities for pkgplan integration tests
//!
//! Git repositories built with the system `git`, a minimal HTTP server for
//! URL sources and a config rooted in a temp directory.

// Not every test file uses every helper
#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use pkgplan_cli::config::Config;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Config with every directory under `root`.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.cwd = root.join("project");
    config.storage.packages = root.join("packages");
    config.storage.tmp = root.join("tmp");
    config.storage.locks = Some(root.join("locks"));
    config.fail_fast_grace_secs = 1;
    config.lock.wait_ms = 20;
    config
}

/// Whether `git` is on PATH. Git tests return early without it.
pub fn has_git() -> bool {
    which::which("git").is_ok()
}

/// Whether `svn` and `svnadmin` are on PATH. Subversion tests return early without them.
pub fn has_svn() -> bool {
    which::which("svn").is_ok() && which::which("svnadmin").is_ok()
}

/// Writes `package.json` into `dir`.
pub fn write_meta(dir: &Path, json: &serde_json::Value) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join("package.json"), serde_json::to_string_pretty(json)?)?;
    Ok(())
}

/// Git command builder for tests
pub struct TestGit {
    repo_path: PathBuf,
}

impl TestGit {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    /// Creates the directory and a repository on branch `master`.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.repo_path)?;
        self.run(&["init", "--quiet"])?;
        self.run(&["checkout", "--quiet", "-b", "master"])?;
        self.run(&["config", "user.email", "test@pkgplan.example"])?;
        self.run(&["config", "user.name", "Test User"])?;
        self.run(&["config", "commit.gpgsign", "false"])?;
        self.run(&["config", "tag.gpgsign", "false"])?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.repo_path
    }

    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.repo_path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Stages everything and commits, returning the new commit hash.
    pub fn commit(&self, message: &str) -> Result<String> {
        self.run(&["add", "-A"])?;
        self.run(&["commit", "--quiet", "-m", message])?;
        self.head()
    }

    pub fn tag(&self, name: &str) -> Result<()> {
        self.run(&["tag", name])?;
        Ok(())
    }

    /// Annotated tags list a tag object whose peeled line points at the commit.
    pub fn annotated_tag(&self, name: &str) -> Result<()> {
        self.run(&["tag", "-a", name, "-m", name])?;
        Ok(())
    }

    pub fn branch(&self, name: &str) -> Result<()> {
        self.run(&["branch", name])?;
        Ok(())
    }

    pub fn checkout(&self, name: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", name])?;
        Ok(())
    }

    pub fn head(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"]).map(|s| s.trim().to_string())
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!("git {} failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Subversion repository with a `trunk/`, `tags/`, `branches/` layout and a
/// trunk working copy, built with the system `svn`.
pub struct TestSvn {
    pub url: String,
    wc: PathBuf,
}

impl TestSvn {
    /// Creates the repository under `root/repo` (revision 1) and checks out trunk.
    pub fn create(root: &Path) -> Result<Self> {
        let repo = root.join("repo");
        fs::create_dir_all(root)?;
        run_tool("svnadmin", &["create", &repo.display().to_string()], root)?;
        let url = format!("file://{}", repo.display());
        let layout: Vec<String> = ["trunk", "tags", "branches"].iter().map(|d| format!("{url}/{d}")).collect();
        let mut args = vec!["mkdir", "--parents", "-m", "layout"];
        args.extend(layout.iter().map(String::as_str));
        run_svn(&args, root)?;

        let wc = root.join("wc");
        run_svn(&["checkout", &format!("{url}/trunk"), &wc.display().to_string()], root)?;
        Ok(Self {
            url,
            wc,
        })
    }

    /// Writes into the trunk working copy, adding the file if it is new.
    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.wc.join(relative);
        let is_new = !path.exists();
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        if is_new {
            run_svn(&["add", relative], &self.wc)?;
        }
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        run_svn(&["commit", "-m", message], &self.wc)?;
        Ok(())
    }

    /// Copies trunk to `tags/<name>` in a revision of its own.
    pub fn tag(&self, name: &str) -> Result<()> {
        let (from, to) = (format!("{}/trunk", self.url), format!("{}/tags/{name}", self.url));
        run_svn(&["copy", "-m", name, &from, &to], &self.wc)?;
        Ok(())
    }
}

fn run_svn(args: &[&str], dir: &Path) -> Result<String> {
    let mut full = vec!["--non-interactive"];
    full.extend_from_slice(args);
    run_tool("svn", &full, dir)
}

fn run_tool(tool: &str, args: &[&str], dir: &Path) -> Result<String> {
    let output = Command::new(tool)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("Failed to run {tool} {}", args.join(" ")))?;
    if !output.status.success() {
        bail!("{tool} {} failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A canned HTTP response.
#[derive(Debug, Clone)]
pub struct Canned {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Canned {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Serves canned responses by path on 127.0.0.1.
///
/// HEAD requests get the GET headers without a body, and 304 when
/// `If-None-Match` equals the response's ETag.
pub struct TestServer {
    pub base: String,
    routes: Arc<Mutex<HashMap<String, Canned>>>,
    hits: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}", listener.local_addr()?);
        let routes: Arc<Mutex<HashMap<String, Canned>>> = Arc::default();
        let hits: Arc<Mutex<Vec<String>>> = Arc::default();

        let (served_routes, served_hits) = (Arc::clone(&routes), Arc::clone(&hits));
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let routes = Arc::clone(&served_routes);
                let hits = Arc::clone(&served_hits);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf).into_owned();
                    let mut lines = request.lines();
                    let mut first = lines.next().unwrap_or("").split_whitespace();
                    let method = first.next().unwrap_or("").to_string();
                    let path = first.next().unwrap_or("/").to_string();
                    let if_none_match = lines.find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("if-none-match").then(|| value.trim().to_string())
                    });
                    hits.lock().unwrap().push(format!("{method} {path}"));

                    let canned = routes.lock().unwrap().get(&path).cloned().unwrap_or(Canned {
                        status: 404,
                        headers: Vec::new(),
                        body: b"not found".to_vec(),
                    });
                    let etag = canned.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case("etag")).map(|(_, v)| v);
                    let status = match (&if_none_match, etag) {
                        (Some(sent), Some(etag)) if method == "HEAD" && sent == etag => 304,
                        _ => canned.status,
                    };

                    let mut response = format!("HTTP/1.1 {status} X\r\nConnection: close\r\n");
                    for (name, value) in &canned.headers {
                        response.push_str(&format!("{name}: {value}\r\n"));
                    }
                    response.push_str(&format!("Content-Length: {}\r\n\r\n", canned.body.len()));
                    let _ = stream.write_all(response.as_bytes()).await;
                    if method != "HEAD" && status != 304 {
                        let _ = stream.write_all(&canned.body).await;
                    }
                    let _ = stream.shutdown().await;
                });
            }
        });

        Ok(Self {
            base,
            routes,
            hits,
        })
    }

    pub fn route(&self, path: &str, canned: Canned) {
        self.routes.lock().unwrap().insert(path.to_string(), canned);
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Requests served so far, as `METHOD /path`.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

/// A gzipped tarball whose entries all live under `top/`.
pub fn tarball(top: &str, files: &[(&str, &str)]) -> Result<Vec<u8>> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, format!("{top}/{name}"), content.as_bytes())?;
    }
    Ok(builder.into_inner()?.finish()?)
}
