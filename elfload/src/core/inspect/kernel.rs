use std::{
    collections::{HashMap, HashSet},
    fs,
    io::Read,
    path::{Path, PathBuf},
    str,
};

use anyhow::{anyhow, bail, Result};
use flate2::bufread::GzDecoder;
use log::{debug, warn};

/// Kernel configuration options needed to attach kprobes and read their
/// output tables.
pub(crate) const REQUIRED_CONFIG: &[&str] =
    &["CONFIG_KPROBES", "CONFIG_BPF_SYSCALL", "CONFIG_BPF_EVENTS"];

/// Provides helpers to inspect probe related information in the kernel.
pub(crate) struct KernelInspector {
    /// Kernel release, eg. "6.2.14-300.fc38.x86_64".
    release: String,
    /// Map of all kernel config options and their values. Common values are
    /// "y", "m" and "n", but options can also be set to a string and some other
    /// types. All are stored as a String here.
    config: Option<HashMap<String, String>>,
    /// Set of traceable functions, if available.
    traceable_funcs: Option<HashSet<String>>,
}

impl KernelInspector {
    pub(crate) fn from(kconf: Option<&PathBuf>) -> Result<KernelInspector> {
        if !cfg!(target_os = "linux") {
            bail!("Only Linux kernels are supported");
        }

        let release = nix::sys::utsname::uname()?
            .release()
            .to_string_lossy()
            .into_owned();
        let config = Self::parse_kernel_config(&release, kconf)?;

        let traceable_funcs = [
            "/sys/kernel/tracing/available_filter_functions",
            "/sys/kernel/debug/tracing/available_filter_functions",
        ]
        .iter()
        .find_map(|p| Self::file_to_hashset(p));
        if traceable_funcs.is_none() {
            warn!("Could not access the list of traceable functions: consider mounting tracefs, if not a permissions issue");
        }

        Ok(KernelInspector {
            release,
            config,
            traceable_funcs,
        })
    }

    /// Convert a file containing a list of functions (one per line) into a
    /// HashSet. Returns None if the file can't be read.
    fn file_to_hashset<P: AsRef<Path>>(target: P) -> Option<HashSet<String>> {
        let file = fs::read_to_string(target).ok()?;
        Some(
            file.lines()
                // Functions might be formatted as "func_name [module]".
                .filter_map(|l| l.split(' ').next())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        )
    }

    /// Parse the kernel configuration.
    fn parse_kernel_config(
        release: &str,
        kconf: Option<&PathBuf>,
    ) -> Result<Option<HashMap<String, String>>> {
        // If we have a user-defined kernel configuration file, use it.
        if let Some(kconf) = kconf {
            return Ok(Some(Self::parse_kernel_config_single(kconf).map_err(
                |e| anyhow!("Could not read {}: {e}", kconf.display()),
            )?));
        }

        // If not, try auto-detection.
        let paths = [
            "/proc/config.gz".to_string(),
            format!("/boot/config-{release}"),
            format!("/lib/modules/{release}/config"),
        ];
        for p in paths.iter() {
            if let Ok(kconf) = Self::parse_kernel_config_single(p) {
                debug!("Using kernel configuration from {p}");
                return Ok(Some(kconf));
            }
        }

        warn!(
            "Could not parse kernel configuration from known paths: some checks won't be performed"
        );
        Ok(None)
    }

    /// Lower level helper to try parsing a single kernel configuration file,
    /// compressed or not.
    fn parse_kernel_config_single<P: AsRef<Path>>(file: P) -> Result<HashMap<String, String>> {
        let bytes = fs::read(file)?;

        // Check gzip magic value.
        if bytes.starts_with(&[0x1f, 0x8b]) {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut content = String::new();
            decoder.read_to_string(&mut content)?;

            Self::parse_kconfig(&content)
        } else {
            Self::parse_kconfig(str::from_utf8(&bytes)?)
        }
    }

    fn parse_kconfig(content: &str) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();

        content.lines().try_for_each(|l| -> Result<()> {
            if l.starts_with("CONFIG_") {
                let (cfg, val) = l
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Could not parse the Kconfig option {l}"))?;

                // Handle string values nicely.
                let val = val.trim_start_matches('"').trim_end_matches('"');

                map.insert(cfg.to_string(), val.to_string());
            } else if let Some(unset) = l.strip_prefix("# CONFIG_") {
                // "# CONFIG_FOO is not set"
                let (cfg, _) = unset
                    .split_once(' ')
                    .ok_or_else(|| anyhow!("Could not parse the Kconfig option {l}"))?;
                map.insert(format!("CONFIG_{cfg}"), "n".to_string());
            }
            Ok(())
        })?;

        Ok(map)
    }

    /// Return the running kernel release.
    pub(crate) fn release(&self) -> &str {
        &self.release
    }

    /// Retrieve a kernel configuration option value, if found. Fails if the
    /// configuration is not available.
    pub(crate) fn get_config_option(&self, option: &str) -> Result<Option<&str>> {
        match &self.config {
            Some(config) => Ok(config.get(option).map(|x| x.as_str())),
            None => bail!("Could not query the kernel configuration"),
        }
    }

    /// Is a function traceable? None if this can't be known.
    pub(crate) fn is_traceable(&self, func: &str) -> Option<bool> {
        self.traceable_funcs
            .as_ref()
            .map(|funcs| funcs.contains(func))
    }

    /// Check the kernel provides what is needed to attach kprobes. Only warns
    /// when the kernel configuration is not available.
    pub(crate) fn check_prerequisites(&self) -> Result<()> {
        if self.config.is_none() {
            warn!("Kernel configuration unavailable, assuming kprobes are supported");
            return Ok(());
        }

        let missing = REQUIRED_CONFIG
            .iter()
            .filter(|opt| !matches!(self.get_config_option(opt), Ok(Some("y"))))
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            bail!(
                "Kernel {} lacks required options: {}",
                self.release,
                missing.join(", ")
            );
        }
        Ok(())
    }
}
