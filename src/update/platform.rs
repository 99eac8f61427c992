//! Platform-specific installer selection and launch.

use crate::error::{Error, Result};
use crate::update::manifest::{Arch, ArtifactRef, PlatformTag, ReleaseManifest};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Host operating systems the updater knows how to install on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    /// Debian-family Linux, installs `.deb` through the desktop opener.
    Linux,
    /// Windows, runs an `.exe` installer detached.
    Windows,
    /// macOS, opens a `.pkg` with Installer.app.
    MacOs,
    /// Anything else; carries the OS name.
    Unsupported(String),
}

impl Platform {
    /// Platform of the running process.
    #[must_use]
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            "macos" => Self::MacOs,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// OS name for messages and events.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Unsupported(os) => os,
        }
    }

    /// Installer format this platform consumes.
    #[must_use]
    pub fn installer_tag(&self) -> Option<PlatformTag> {
        match self {
            Self::Linux => Some(PlatformTag::Deb),
            Self::Windows => Some(PlatformTag::Exe),
            Self::MacOs => Some(PlatformTag::Pkg),
            Self::Unsupported(_) => None,
        }
    }
}

/// Chooses and launches the installer for one platform/architecture pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInstaller {
    platform: Platform,
    arch: Option<Arch>,
}

impl PlatformInstaller {
    /// Installer for the running host.
    #[must_use]
    pub fn detect() -> Self {
        Self::new(Platform::current(), Arch::current())
    }

    /// Installer for an explicit platform and architecture.
    #[must_use]
    pub fn new(platform: Platform, arch: Option<Arch>) -> Self {
        Self { platform, arch }
    }

    /// Target platform.
    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Target architecture.
    #[must_use]
    pub fn arch(&self) -> Option<Arch> {
        self.arch
    }

    fn unsupported(&self) -> Error {
        Error::UnsupportedPlatform(self.platform.name().to_string())
    }

    /// File extension of installers for this platform.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPlatform`] when no installer format is defined.
    pub fn extension(&self) -> Result<&'static str> {
        self.platform
            .installer_tag()
            .map(PlatformTag::extension)
            .ok_or_else(|| self.unsupported())
    }

    /// Pick the artifact to download for this platform.
    ///
    /// Preference order: format and architecture match, format match with no
    /// architecture, (macOS) a `.pkg` derived from a `.dmg`, a lone untagged
    /// artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPlatform`] on hosts without an installer
    /// format and [`Error::NoMatchingArtifact`] when nothing fits.
    pub fn select_artifact(&self, manifest: &ReleaseManifest) -> Result<ArtifactRef> {
        let tag = self.platform.installer_tag().ok_or_else(|| self.unsupported())?;
        let artifacts = &manifest.artifacts;
        let with_tag = |t: PlatformTag| artifacts.iter().filter(move |a| a.platform_tag == Some(t));

        if let Some(arch) = self.arch {
            if let Some(found) = with_tag(tag).find(|a| a.arch == Some(arch)) {
                return Ok(found.clone());
            }
        }

        let untagged_arch = with_tag(tag).find(|a| a.arch.is_none() || self.arch.is_none());
        if let Some(found) = untagged_arch {
            return Ok(found.clone());
        }

        if self.platform == Platform::MacOs && with_tag(PlatformTag::Pkg).next().is_none() {
            let dmg = self
                .arch
                .and_then(|arch| with_tag(PlatformTag::Dmg).find(|a| a.arch == Some(arch)))
                .or_else(|| with_tag(PlatformTag::Dmg).next());
            if let Some(dmg) = dmg {
                let url = derive_pkg_url(&dmg.url, self.arch);
                debug!("Derived installer package {url} from disk image {}", dmg.url);
                return Ok(ArtifactRef {
                    url,
                    platform_tag: Some(PlatformTag::Pkg),
                    arch: self.arch.or(dmg.arch),
                });
            }
        }

        if let [only] = artifacts.as_slice() {
            if only.platform_tag.is_none() {
                return Ok(only.clone());
            }
        }

        Err(Error::NoMatchingArtifact(self.platform.name().to_string()))
    }

    /// Command that launches the installer at `path`, without spawning it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPlatform`] when no install action exists.
    pub fn command(&self, path: &Path) -> Result<Command> {
        let mut cmd = match &self.platform {
            Platform::MacOs => {
                let mut command = Command::new("open");
                command.arg(path);
                command
            }
            Platform::Windows => {
                #[allow(unused_mut)]
                let mut command = Command::new(path);
                #[cfg(target_os = "windows")]
                {
                    use std::os::windows::process::CommandExt;
                    // DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP
                    command.creation_flags(0x0000_0008 | 0x0000_0200);
                }
                command
            }
            Platform::Linux => {
                let mut command = Command::new("xdg-open");
                command.arg(path);
                #[cfg(unix)]
                {
                    use std::os::unix::process::CommandExt;
                    command.process_group(0);
                }
                command
            }
            Platform::Unsupported(_) => return Err(self.unsupported()),
        };

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        Ok(cmd)
    }

    /// Launch the installer and return without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPlatform`] on unsupported hosts and
    /// [`Error::Install`] if the file is missing or the launch fails.
    pub fn install(&self, path: &Path) -> Result<()> {
        let mut cmd = self.command(path)?;

        if !path.is_file() {
            return Err(Error::Install(format!(
                "installer not found at {}",
                path.display()
            )));
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Install(format!("failed to launch {}: {e}", path.display()))
        })?;
        info!(
            "Launched installer {} on {} (pid {})",
            path.display(),
            self.platform.name(),
            child.id()
        );

        if self.platform != Platform::Windows {
            // Openers exit quickly; reap them off-thread.
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }

        Ok(())
    }
}

/// Turn a disk-image URL into the matching installer-package URL.
///
/// Swaps the `.dmg` suffix for `.pkg` and, when `arch` is known, rewrites an
/// architecture token for the other architecture in the file name.
#[must_use]
pub fn derive_pkg_url(url: &str, arch: Option<Arch>) -> String {
    let (base, suffix) = url
        .find(['?', '#'])
        .map_or((url, ""), |i| url.split_at(i));
    let (dir, name) = base.rfind('/').map_or(("", base), |i| base.split_at(i + 1));

    let mut name = name.to_string();
    if name.to_ascii_lowercase().ends_with(".dmg") {
        name.truncate(name.len() - ".dmg".len());
        name.push_str(".pkg");
    }

    if let Some(arch) = arch {
        name = reconcile_arch(&name, arch);
    }

    format!("{dir}{name}{suffix}")
}

/// Single-segment spellings of an architecture in file names.
fn arch_spellings(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::X64 => &["x64", "amd64"],
        Arch::Arm64 => &["arm64", "aarch64"],
    }
}

/// Replace whole `-`/`_`/`.`-delimited segments naming the other architecture.
fn reconcile_arch(name: &str, arch: Arch) -> String {
    let other = match arch {
        Arch::X64 => Arch::Arm64,
        Arch::Arm64 => Arch::X64,
    };

    let mut out = String::with_capacity(name.len());
    let mut start = 0;
    for (i, c) in name.char_indices().filter(|(_, c)| matches!(c, '-' | '_' | '.')) {
        push_segment(&mut out, &name[start..i], other, arch);
        out.push(c);
        start = i + c.len_utf8();
    }
    push_segment(&mut out, &name[start..], other, arch);
    out
}

fn push_segment(out: &mut String, segment: &str, other: Arch, arch: Arch) {
    if arch_spellings(other)
        .iter()
        .any(|s| segment.eq_ignore_ascii_case(s))
    {
        out.push_str(arch.token());
    } else {
        out.push_str(segment);
    }
}
