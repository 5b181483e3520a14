#![allow(unused_macros)]
//! Routing of log records by target: authentication events go to syslog,
//! messages for the user to stderr and developer diagnostics (only with the
//! `dev` feature) to a file.
use self::simple_logger::SimpleLogger;
use self::syslog::Syslog;
use std::ops::Deref;

mod simple_logger;
mod syslog;

macro_rules! logger_macro {
    ($name:ident is $rule_level:ident to $target:expr, $d:tt) => {
        macro_rules! $name {
            ($d($d arg:tt)+) => (::log::log!(target: $target, ::log::Level::$rule_level, $d($d arg)+));
        }

        #[allow(unused_imports)]
        pub(crate) use $name;
    };
    ($name:ident is $rule_level:ident to $target:expr) => {
        logger_macro!($name is $rule_level to $target, $);
    };
}

logger_macro!(auth_warn is Warn to "pam_bridge::auth");
logger_macro!(auth_info is Info to "pam_bridge::auth");

logger_macro!(user_error is Error to "pam_bridge::user");
logger_macro!(user_warn is Warn to "pam_bridge::user");

macro_rules! dev_logger_macro {
    ($name:ident is $rule_level:ident to $target:expr, $d:tt) => {
        macro_rules! $name {
            ($d($d arg:tt)+) => {
                if std::cfg!(feature = "dev") {
                    (::log::log!(
                        target: $target,
                        ::log::Level::$rule_level,
                        "{}: {}",
                        std::panic::Location::caller(),
                        format_args!($d($d arg)+)
                    ));
                }
            };
        }

        #[allow(unused_imports)]
        pub(crate) use $name;
    };
    ($name:ident is $rule_level:ident to $target:expr) => {
        dev_logger_macro!($name is $rule_level to $target, $);
    };
}

dev_logger_macro!(dev_warn is Warn to "pam_bridge::dev");
dev_logger_macro!(dev_info is Info to "pam_bridge::dev");
dev_logger_macro!(dev_debug is Debug to "pam_bridge::dev");

/// A `log::Log` that hands each record to every sink registered for a prefix
/// of its target.
#[derive(Default)]
pub struct BridgeLogger(Vec<(String, Box<dyn log::Log>)>);

impl BridgeLogger {
    pub fn new(prefix: &'static str) -> Self {
        let mut logger: Self = Default::default();

        logger.add_logger("pam_bridge::auth", Syslog);

        logger.add_logger("pam_bridge::user", SimpleLogger::to_stderr(prefix));

        #[cfg(feature = "dev")]
        {
            let path = option_env!("PAM_BRIDGE_DEV_LOGS")
                .map(|s| s.into())
                .unwrap_or_else(|| {
                    std::env::temp_dir().join(format!("pam-bridge-dev-{}.log", std::process::id()))
                });
            match SimpleLogger::to_file(&path, "") {
                Ok(file_logger) => logger.add_logger("pam_bridge::dev", file_logger),
                Err(err) => eprintln_ignore_io_error!(
                    "{prefix}cannot open {}: {err}",
                    path.display()
                ),
            }
        }

        logger
    }

    /// Install this logger for the whole process. Only the first call has any
    /// effect.
    pub fn into_global_logger(self) {
        if log::set_boxed_logger(Box::new(self)).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    }

    /// Add a logger for a specific prefix to the stack
    fn add_logger(
        &mut self,
        prefix: impl ToString + Deref<Target = str>,
        logger: impl log::Log + 'static,
    ) {
        let prefix = if prefix.ends_with("::") {
            prefix.to_string()
        } else {
            // given a prefix `my::prefix`, we want to match `my::prefix::somewhere`
            // but not `my::prefix_to_somewhere`
            format!("{}::", prefix.to_string())
        };
        self.0.push((prefix, Box::new(logger)))
    }

    fn sinks_for<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a dyn log::Log> {
        self.0
            .iter()
            .filter(move |(prefix, _)| {
                target == &prefix[..prefix.len() - 2] || target.starts_with(prefix.as_str())
            })
            .map(|(_, sink)| sink.as_ref())
    }
}

impl log::Log for BridgeLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level() && metadata.level() <= log::STATIC_MAX_LEVEL
    }

    fn log(&self, record: &log::Record) {
        for sink in self.sinks_for(record.target()) {
            sink.log(record);
        }
    }

    fn flush(&self) {
        for (_, l) in self.0.iter() {
            l.flush();
        }
    }
}
