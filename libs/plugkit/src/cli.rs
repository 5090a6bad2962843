//! Command line handle shared by the host and its modules.
//!
//! Modules register options during the prepare phase and keep the returned
//! [`CliValue`] handles; the values are filled in when the host parses the
//! command line, before any module is initialized.

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Command};
use parking_lot::RwLock;
use thiserror::Error;

/// Identity of the host application, used for help and version output.
#[derive(Debug, Clone, Default)]
pub struct AppInfo {
    pub name: String,
    pub description: String,
    /// Printed verbatim for `--version`.
    pub version_page: String,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("command line option '{option}' is already registered")]
    DuplicateOption { option: String },
    #[error("invalid value '{value}' for '--{option}': {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },
    #[error("{message}")]
    Usage { message: String },
}

/// Result of parsing the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliOutcome {
    Continue,
    /// Help or version was requested; print `message` and exit.
    Quit { message: String },
}

/// Shared slot holding the parsed value of one option.
#[derive(Debug)]
pub struct CliValue<T>(Arc<RwLock<T>>);

impl<T> Clone for CliValue<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> CliValue<T> {
    fn new(initial: T) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    /// Current value: the default until the command line has been parsed.
    pub fn get(&self) -> T {
        self.0.read().clone()
    }

    fn set(&self, value: T) {
        *self.0.write() = value;
    }
}

/// Name, optional short alias and help text of an option.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    long: String,
    short: Option<char>,
    help: String,
}

impl OptionSpec {
    pub fn new(long: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            long: long.into(),
            short: None,
            help: help.into(),
        }
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }
}

type Binder = Box<dyn Fn(&ArgMatches) -> Result<(), CliError> + Send + Sync>;

struct Registered {
    spec: OptionSpec,
    arg: Arg,
    bind: Binder,
}

/// Command line definition assembled from host and module registrations.
pub struct Cli {
    info: AppInfo,
    options: Vec<Registered>,
}

impl std::fmt::Debug for Cli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cli")
            .field("app", &self.info.name)
            .field(
                "options",
                &self.options.iter().map(|o| &o.spec.long).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// Reserved by clap for help and version.
const RESERVED_LONG: [&str; 2] = ["help", "version"];
const RESERVED_SHORT: [char; 2] = ['h', 'V'];

impl Cli {
    pub fn new(info: AppInfo) -> Self {
        Self {
            info,
            options: Vec::new(),
        }
    }

    pub fn app_info(&self) -> &AppInfo {
        &self.info
    }

    /// Register an option taking one value parsed with `FromStr`.
    pub fn add_option<T>(&mut self, spec: OptionSpec, default: T) -> Result<CliValue<T>, CliError>
    where
        T: FromStr + Display + Clone + Send + Sync + 'static,
        T::Err: Display,
    {
        self.ensure_unique(&spec)?;
        let value = CliValue::new(default.clone());
        let arg = base_arg(&spec)
            .help(format!("{} [default: {default}]", spec.help))
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(String));

        let slot = value.clone();
        let long = spec.long.clone();
        let bind: Binder = Box::new(move |m| {
            if let Some(raw) = m.get_one::<String>(&long) {
                slot.set(parse_value::<T>(&long, raw)?);
            }
            Ok(())
        });
        self.options.push(Registered { spec, arg, bind });
        Ok(value)
    }

    /// Register a boolean switch; `true` when present.
    pub fn add_flag(&mut self, spec: OptionSpec) -> Result<CliValue<bool>, CliError> {
        self.ensure_unique(&spec)?;
        let value = CliValue::new(false);
        let arg = base_arg(&spec)
            .help(spec.help.clone())
            .action(ArgAction::SetTrue);

        let slot = value.clone();
        let long = spec.long.clone();
        let bind: Binder = Box::new(move |m| {
            slot.set(m.get_flag(&long));
            Ok(())
        });
        self.options.push(Registered { spec, arg, bind });
        Ok(value)
    }

    /// Register a switch counting its occurrences (`-vvv` is 3).
    pub fn add_count(&mut self, spec: OptionSpec) -> Result<CliValue<u8>, CliError> {
        self.ensure_unique(&spec)?;
        let value = CliValue::new(0);
        let arg = base_arg(&spec)
            .help(spec.help.clone())
            .action(ArgAction::Count);

        let slot = value.clone();
        let long = spec.long.clone();
        let bind: Binder = Box::new(move |m| {
            slot.set(m.get_count(&long));
            Ok(())
        });
        self.options.push(Registered { spec, arg, bind });
        Ok(value)
    }

    /// Register a repeatable option collecting every value.
    pub fn add_list<T>(&mut self, spec: OptionSpec) -> Result<CliValue<Vec<T>>, CliError>
    where
        T: FromStr + Clone + Send + Sync + 'static,
        T::Err: Display,
    {
        self.ensure_unique(&spec)?;
        let value = CliValue::new(Vec::new());
        let arg = base_arg(&spec)
            .help(spec.help.clone())
            .action(ArgAction::Append)
            .value_parser(clap::value_parser!(String));

        let slot = value.clone();
        let long = spec.long.clone();
        let bind: Binder = Box::new(move |m| {
            let parsed = m
                .get_many::<String>(&long)
                .into_iter()
                .flatten()
                .map(|raw| parse_value::<T>(&long, raw))
                .collect::<Result<Vec<_>, _>>()?;
            slot.set(parsed);
            Ok(())
        });
        self.options.push(Registered { spec, arg, bind });
        Ok(value)
    }

    /// Drop a previously registered option. Returns whether it existed.
    pub fn remove_option(&mut self, long: &str) -> bool {
        let before = self.options.len();
        self.options.retain(|o| o.spec.long != long);
        before != self.options.len()
    }

    pub fn has_option(&self, long: &str) -> bool {
        self.options.iter().any(|o| o.spec.long == long)
    }

    /// Rendered `--help` text.
    pub fn help(&self) -> String {
        self.command().render_help().to_string()
    }

    /// Parse `args` (including the program name) and fill every registered value.
    pub fn parse<I, S>(&self, args: I) -> Result<CliOutcome, CliError>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        let matches = match self.command().try_get_matches_from(args) {
            Ok(m) => m,
            Err(e) => {
                return match e.kind() {
                    ErrorKind::DisplayHelp
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                        Ok(CliOutcome::Quit {
                            message: e.render().to_string(),
                        })
                    }
                    ErrorKind::DisplayVersion => Ok(CliOutcome::Quit {
                        message: format!("{}\n", self.info.version_page),
                    }),
                    _ => Err(CliError::Usage {
                        message: e.render().to_string(),
                    }),
                };
            }
        };

        for option in &self.options {
            (option.bind)(&matches)?;
        }
        Ok(CliOutcome::Continue)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(self.info.name.clone())
            .about(self.info.description.clone())
            .version(self.info.version_page.clone());
        for option in &self.options {
            cmd = cmd.arg(option.arg.clone());
        }
        cmd
    }

    fn ensure_unique(&self, spec: &OptionSpec) -> Result<(), CliError> {
        let mut longs: HashSet<&str> = RESERVED_LONG.into_iter().collect();
        let mut shorts: HashSet<char> = RESERVED_SHORT.into_iter().collect();
        for o in &self.options {
            longs.insert(o.spec.long.as_str());
            if let Some(s) = o.spec.short {
                shorts.insert(s);
            }
        }

        if longs.contains(spec.long.as_str()) {
            return Err(CliError::DuplicateOption {
                option: format!("--{}", spec.long),
            });
        }
        if let Some(s) = spec.short.filter(|s| shorts.contains(s)) {
            return Err(CliError::DuplicateOption {
                option: format!("-{s}"),
            });
        }
        Ok(())
    }
}

fn base_arg(spec: &OptionSpec) -> Arg {
    let arg = Arg::new(spec.long.clone()).long(spec.long.clone());
    match spec.short {
        Some(s) => arg.short(s),
        None => arg,
    }
}

fn parse_value<T>(long: &str, raw: &str) -> Result<T, CliError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| CliError::InvalidValue {
        option: long.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> Cli {
        Cli::new(AppInfo {
            name: "demo".into(),
            description: "Demo host".into(),
            version_page: "demo 1.2.3".into(),
        })
    }

    #[test]
    fn values_keep_defaults_until_parsed() {
        let mut cli = cli();
        let n = cli
            .add_option(OptionSpec::new("increase", "Number of increases").short('i'), 1_i32)
            .unwrap();
        assert_eq!(n.get(), 1);

        assert_eq!(cli.parse(["demo", "-i", "5"]).unwrap(), CliOutcome::Continue);
        assert_eq!(n.get(), 5);
    }

    #[test]
    fn absent_option_keeps_default() {
        let mut cli = cli();
        let name = cli
            .add_option(OptionSpec::new("name", "Name"), String::from("anon"))
            .unwrap();
        let debug = cli.add_flag(OptionSpec::new("log-debug", "Debug")).unwrap();
        cli.parse(["demo"]).unwrap();
        assert_eq!(name.get(), "anon");
        assert!(!debug.get());
    }

    #[test]
    fn flags_counts_and_lists() {
        let mut cli = cli();
        let debug = cli.add_flag(OptionSpec::new("log-debug", "Debug")).unwrap();
        let verbose = cli
            .add_count(OptionSpec::new("verbose", "Verbosity").short('v'))
            .unwrap();
        let dirs = cli
            .add_list::<String>(OptionSpec::new("plugins-dir", "Plugin directory"))
            .unwrap();

        cli.parse([
            "demo",
            "--log-debug",
            "-vv",
            "--plugins-dir",
            "/a",
            "--plugins-dir",
            "/b",
        ])
        .unwrap();

        assert!(debug.get());
        assert_eq!(verbose.get(), 2);
        assert_eq!(dirs.get(), vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut cli = cli();
        cli.add_flag(OptionSpec::new("x", "first").short('x')).unwrap();
        assert!(matches!(
            cli.add_flag(OptionSpec::new("x", "again")),
            Err(CliError::DuplicateOption { .. })
        ));
        assert!(matches!(
            cli.add_flag(OptionSpec::new("other", "same short").short('x')),
            Err(CliError::DuplicateOption { option }) if option == "-x"
        ));
        assert!(matches!(
            cli.add_flag(OptionSpec::new("help", "reserved")),
            Err(CliError::DuplicateOption { .. })
        ));
    }

    #[test]
    fn invalid_value_is_reported() {
        let mut cli = cli();
        cli.add_option(OptionSpec::new("count", "Count"), 0_u16).unwrap();
        match cli.parse(["demo", "--count", "many"]) {
            Err(CliError::InvalidValue { option, value, .. }) => {
                assert_eq!(option, "count");
                assert_eq!(value, "many");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn unknown_argument_is_a_usage_error() {
        let cli = cli();
        assert!(matches!(
            cli.parse(["demo", "--nope"]),
            Err(CliError::Usage { .. })
        ));
    }

    #[test]
    fn help_and_version_ask_to_quit() {
        let mut cli = cli();
        cli.add_flag(OptionSpec::new("log-debug", "Log debug and trace messages"))
            .unwrap();

        match cli.parse(["demo", "--help"]).unwrap() {
            CliOutcome::Quit { message } => assert!(message.contains("--log-debug")),
            other => panic!("expected Quit, got {other:?}"),
        }
        assert_eq!(
            cli.parse(["demo", "--version"]).unwrap(),
            CliOutcome::Quit {
                message: "demo 1.2.3\n".into()
            }
        );
    }

    #[test]
    fn removed_option_is_no_longer_accepted() {
        let mut cli = cli();
        cli.add_flag(OptionSpec::new("temp", "Temporary")).unwrap();
        assert!(cli.remove_option("temp"));
        assert!(!cli.remove_option("temp"));
        assert!(!cli.has_option("temp"));
        assert!(cli.parse(["demo", "--temp"]).is_err());
    }
}
