use crate::config::{LoggingConfig, Section};
use parking_lot::Mutex;
use std::io::IsTerminal;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, util::SubscriberInitExt, Layer};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

/// Key of the catch-all logging section.
pub const DEFAULT_SECTION: &str = "default";

const DEFAULT_MAX_SIZE_MB: u64 = 100;

// Keep a guard for non-blocking console to avoid being dropped.
static CONSOLE_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

// ================= level helpers =================

fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

fn level_filter(s: &str) -> LevelFilter {
    parse_tracing_level(s).map_or(LevelFilter::OFF, LevelFilter::from_level)
}

/// Returns true if target == crate_name or target starts with "crate_name::"
fn matches_crate_prefix(target: &str, crate_name: &str) -> bool {
    target
        .strip_prefix(crate_name)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

// ================= rotating writer for files =================

#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl Write for RotWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

// A writer handle that may be None (drops writes)
struct RoutedWriter(Option<RotWriter>);

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Routes records to files by target prefix; the longest matching prefix wins.
#[derive(Clone, Default)]
struct MultiFileRouter {
    default: Option<RotWriter>,
    by_prefix: Vec<(String, RotWriter)>,
}

impl MultiFileRouter {
    fn resolve_for(&self, target: &str) -> Option<RotWriter> {
        self.by_prefix
            .iter()
            .filter(|(prefix, _)| matches_crate_prefix(target, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, w)| w.clone())
            .or_else(|| self.default.clone())
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for MultiFileRouter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        RoutedWriter(self.resolve_for(meta.target()))
    }
}

// ================= config extraction =================

struct ConfigData<'a> {
    default_section: Option<&'a Section>,
    crate_sections: Vec<(&'a str, &'a Section)>,
}

fn extract_config_data(cfg: &LoggingConfig) -> ConfigData<'_> {
    let mut crate_sections: Vec<(&str, &Section)> = cfg
        .iter()
        .filter(|(k, _)| k.as_str() != DEFAULT_SECTION)
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    crate_sections.sort_by_key(|(k, _)| *k);

    ConfigData {
        default_section: cfg.get(DEFAULT_SECTION),
        crate_sections,
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn open_section_writer(name: &str, section: &Section, base_dir: &Path) -> Option<RotWriter> {
    if section.file.trim().is_empty() {
        return None;
    }

    let log_path = resolve_log_path(&section.file, base_dir);
    if let Some(parent) = log_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!(
                "Failed to init log file for '{}': {} ({})",
                name,
                log_path.display(),
                e
            );
            return None;
        }
    }

    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) as usize * 1024 * 1024;
    // Respect retention policy: prefer MaxFiles if provided, else Age
    let limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(
            i64::from(section.max_age_days.unwrap_or(1)),
        )),
    };

    let rot = FileRotate::new(
        &log_path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );
    Some(RotWriter(Arc::new(Mutex::new(rot))))
}

fn build_file_router(config: &ConfigData, base_dir: &Path) -> MultiFileRouter {
    let mut router = MultiFileRouter {
        default: config
            .default_section
            .and_then(|s| open_section_writer(DEFAULT_SECTION, s, base_dir)),
        by_prefix: Vec::new(),
    };

    for (crate_name, section) in &config.crate_sections {
        if let Some(writer) = open_section_writer(crate_name, section, base_dir) {
            router.by_prefix.push((crate_name.to_string(), writer));
        }
    }
    router
}

// ================= targets =================

fn console_targets(config: &ConfigData) -> Targets {
    let default_level = config
        .default_section
        .map_or(LevelFilter::INFO, |s| level_filter(&s.console_level));

    config
        .crate_sections
        .iter()
        .fold(Targets::new().with_default(default_level), |t, (name, s)| {
            t.with_target(name.to_string(), level_filter(&s.console_level))
        })
}

fn file_targets(config: &ConfigData, has_default_file: bool) -> Targets {
    let fallback = if has_default_file {
        LevelFilter::INFO
    } else {
        LevelFilter::OFF
    };
    let default_level = config
        .default_section
        .filter(|s| has_default_file && !s.file_level.trim().is_empty())
        .map_or(fallback, |s| level_filter(&s.file_level));

    // A section without a file shares the default file at the default level.
    config
        .crate_sections
        .iter()
        .filter(|(_, s)| !s.file.trim().is_empty())
        .fold(Targets::new().with_default(default_level), |t, (name, s)| {
            t.with_target(name.to_string(), level_filter(&s.file_level))
        })
}

// ================= public init =================

/// Install the global subscriber described by `cfg`.
///
/// Relative log file paths are resolved against `base_dir`. `RUST_LOG`, when set,
/// caps every sink. Without any section a minimal console subscriber is used.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    // Bridge `log` → `tracing` *before* installing the subscriber
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    let data = extract_config_data(cfg);
    if data.crate_sections.is_empty() && data.default_section.is_none() {
        init_minimal();
        return;
    }

    let file_router = build_file_router(&data, base_dir);
    let console = console_targets(&data);
    let files = file_targets(&data, file_router.default.is_some());

    install_subscriber(console, files, file_router);
}

fn install_subscriber(console_targets: Targets, file_targets: Targets, file_router: MultiFileRouter) {
    use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

    let env: Option<EnvFilter> = EnvFilter::try_from_default_env().ok();

    // Console writer (non-blocking stderr)
    let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(nb_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file_layer = (!file_router.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(file_router)
            .with_filter(file_targets)
    });

    let subscriber = Registry::default()
        .with(env)
        .with(console_layer)
        .with(file_layer);

    let _ = subscriber.try_init();
}

/// INFO to console; honors `RUST_LOG`.
pub fn init_minimal() {
    use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

    let env = EnvFilter::try_from_default_env().ok();
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(LevelFilter::INFO);

    let _ = Registry::default().with(env).with(fmt_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn section(console: &str, file: &str, file_level: &str) -> Section {
        Section {
            console_level: console.into(),
            file: file.into(),
            file_level: file_level.into(),
            max_age_days: None,
            max_backups: Some(1),
            max_size_mb: Some(1),
        }
    }

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_tracing_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_tracing_level("off"), None);
        assert_eq!(parse_tracing_level("bogus"), Some(Level::INFO));
        assert_eq!(level_filter("none"), LevelFilter::OFF);
    }

    #[test]
    fn crate_prefix_requires_path_boundary() {
        assert!(matches_crate_prefix("plugkit", "plugkit"));
        assert!(matches_crate_prefix("plugkit::system", "plugkit"));
        assert!(!matches_crate_prefix("plugkit_bootstrap", "plugkit"));
        assert!(!matches_crate_prefix("other", "plugkit"));
    }

    #[test]
    fn router_prefers_longest_prefix_then_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg: LoggingConfig = HashMap::new();
        cfg.insert(DEFAULT_SECTION.into(), section("info", "all.log", "debug"));
        cfg.insert("plugkit".into(), section("info", "core.log", "debug"));
        cfg.insert("plugkit::system".into(), section("info", "system.log", "trace"));

        let data = extract_config_data(&cfg);
        let router = build_file_router(&data, dir.path());
        assert!(!router.is_empty());

        let same = |a: &Option<RotWriter>, b: &RotWriter| {
            a.as_ref().is_some_and(|w| Arc::ptr_eq(&w.0, &b.0))
        };
        let by_name = |name: &str| {
            router
                .by_prefix
                .iter()
                .find(|(p, _)| p == name)
                .map(|(_, w)| w.clone())
                .unwrap()
        };

        assert!(same(
            &router.resolve_for("plugkit::system::engine"),
            &by_name("plugkit::system")
        ));
        assert!(same(&router.resolve_for("plugkit::cli"), &by_name("plugkit")));
        assert!(same(
            &router.resolve_for("product_consumer"),
            router.default.as_ref().unwrap()
        ));
    }

    #[test]
    fn sections_without_files_do_not_open_writers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg: LoggingConfig = HashMap::new();
        cfg.insert("plugkit".into(), section("debug", "", ""));

        let data = extract_config_data(&cfg);
        let router = build_file_router(&data, dir.path());
        assert!(router.is_empty());
        assert!(router.resolve_for("plugkit").is_none());
    }

    #[test]
    fn relative_log_paths_resolve_against_base() {
        let base = Path::new("/var/lib/plugkit");
        assert_eq!(
            resolve_log_path("logs/host.log", base),
            base.join("logs/host.log")
        );
        assert_eq!(
            resolve_log_path("/tmp/host.log", base),
            PathBuf::from("/tmp/host.log")
        );
    }
}
