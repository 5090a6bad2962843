//! Early scan of the raw command line.
//!
//! The configuration file and plugin directories decide which modules exist, and
//! the modules decide which options the full parser accepts. This scan picks out
//! the two host options needed before that, ignoring everything else.

/// Host options that must be known before modules are loaded.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BootArgs {
    pub config: Option<String>,
    pub plugin_dirs: Vec<String>,
}

impl BootArgs {
    /// Scan `args` without the program name. Scanning stops at `--`.
    pub fn scan<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut boot = Self::default();
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            let arg = arg.as_ref();
            if arg == "--" {
                break;
            }

            if let Some(v) = arg.strip_prefix("--config=") {
                boot.config = Some(v.to_string());
            } else if arg == "--config" || arg == "-c" {
                if let Some(v) = iter.next() {
                    boot.config = Some(v.as_ref().to_string());
                }
            } else if let Some(v) = arg.strip_prefix("-c").filter(|v| !v.is_empty()) {
                boot.config = Some(v.trim_start_matches('=').to_string());
            } else if let Some(v) = arg.strip_prefix("--plugins-dir=") {
                boot.plugin_dirs.push(v.to_string());
            } else if arg == "--plugins-dir" {
                if let Some(v) = iter.next() {
                    boot.plugin_dirs.push(v.as_ref().to_string());
                }
            }
        }

        boot
    }
}
