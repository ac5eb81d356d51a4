//! Find-or-fetch for tools a worker depends on
//!
//! A [`ToolSpec`] names a tool and where to download it for each platform.
//! [`ToolAcquirer::ensure`] returns a path to a usable executable, downloading
//! it into the install directory only when resolution finds nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::{Result, ToolError};
use crate::resolve::{executable_name, BinaryResolver};

/// Platform key for the running host, e.g. `linux-amd64` or `darwin-arm64`
pub fn current_platform() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{}-{}", os, arch)
}

/// A tool and its per-platform download locations
#[derive(Debug, Clone, Default)]
pub struct ToolSpec {
    /// Executable name without platform suffix
    pub name: String,
    /// Download URL keyed by platform (see [`current_platform`])
    pub downloads: HashMap<String, String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            downloads: HashMap::new(),
        }
    }

    /// Register a download for one platform
    pub fn with_download(mut self, platform: impl Into<String>, url: impl Into<String>) -> Self {
        self.downloads.insert(platform.into(), url.into());
        self
    }

    /// Download URL for the running platform
    pub fn download_url(&self) -> Option<&str> {
        self.downloads.get(&current_platform()).map(String::as_str)
    }
}

/// Resolves tools, downloading missing ones
#[derive(Debug, Clone)]
pub struct ToolAcquirer {
    resolver: BinaryResolver,
    install_dir: PathBuf,
    client: Client,
}

impl ToolAcquirer {
    /// Acquirer downloading into `install_dir`.
    ///
    /// The install directory is also searched after the resolver's own
    /// locations, so a tool fetched once is found on the next run.
    pub fn new(resolver: BinaryResolver, install_dir: impl Into<PathBuf>) -> Self {
        let install_dir = install_dir.into();
        let resolver = if resolver.fallback_dirs().contains(&install_dir) {
            resolver
        } else {
            resolver.with_fallback_dir(install_dir.clone())
        };
        Self {
            resolver,
            install_dir,
            client: Client::new(),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Where `name` is placed when downloaded
    pub fn installed_path(&self, name: &str) -> PathBuf {
        self.install_dir.join(executable_name(name))
    }

    /// Return a path to `spec`'s executable, downloading it if needed
    #[instrument(skip(self, spec, cancel), fields(tool = %spec.name))]
    pub async fn ensure(&self, spec: &ToolSpec, cancel: &CancellationToken) -> Result<PathBuf> {
        if let Some(path) = self.resolver.locate(&spec.name, None) {
            debug!(path = %path.display(), "tool already available");
            return Ok(path);
        }

        let platform = current_platform();
        let Some(url) = spec.downloads.get(&platform) else {
            return Err(if spec.downloads.is_empty() {
                ToolError::NotFound {
                    tool: spec.name.clone(),
                }
            } else {
                ToolError::UnsupportedPlatform {
                    tool: spec.name.clone(),
                    platform,
                }
            });
        };

        let target = self.installed_path(&spec.name);
        info!(url = %url, target = %target.display(), "downloading tool");
        self.download(&spec.name, url, &target, cancel).await?;
        make_executable(&target)?;

        if !target.is_file() {
            return Err(ToolError::InstallMissing(target));
        }
        info!(path = %target.display(), "tool installed");
        Ok(target)
    }

    /// Stream `url` into `target` through a `.part` file
    async fn download(&self, tool: &str, url: &str, target: &Path, cancel: &CancellationToken) -> Result<()> {
        tokio::fs::create_dir_all(&self.install_dir).await?;
        let partial = target.with_extension("part");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Canceled { tool: tool.to_string() }),
            r = self.fetch(url, &partial) => r,
        };
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, target).await?;
        Ok(())
    }

    async fn fetch(&self, url: &str, partial: &Path) -> Result<()> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::DownloadFailed {
                url: url.to_string(),
                message: format!("server responded with {}", status),
            });
        }

        let mut file = tokio::fs::File::create(partial).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(bytes = written, "download complete");
        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
