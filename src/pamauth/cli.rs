#[derive(Debug, PartialEq)]
pub(crate) struct PamauthOptions {
    pub(crate) service: String,
    pub(crate) prompt: Option<String>,
    pub(crate) non_interactive: bool,
    pub(crate) stdin: bool,
    pub(crate) user: Option<String>,
    pub(crate) action: PamauthAction,
}

impl Default for PamauthOptions {
    fn default() -> Self {
        Self {
            service: PamauthOptions::DEFAULT_SERVICE.to_string(),
            prompt: None,
            non_interactive: false,
            stdin: false,
            user: None,
            action: PamauthAction::Authenticate,
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum PamauthAction {
    Help,
    Version,
    Authenticate,
}

type OptionSetter = fn(&mut PamauthOptions, Option<String>) -> Result<(), String>;

struct PamauthOption {
    short: char,
    long: &'static str,
    takes_argument: bool,
    set: OptionSetter,
}

impl PamauthOptions {
    pub(crate) const DEFAULT_SERVICE: &'static str = "pamauth";

    const PAMAUTH_OPTIONS: &'static [PamauthOption] = &[
        PamauthOption {
            short: 'h',
            long: "help",
            takes_argument: false,
            set: |options, _| {
                options.action = PamauthAction::Help;
                Ok(())
            },
        },
        PamauthOption {
            short: 'n',
            long: "non-interactive",
            takes_argument: false,
            set: |options, _| {
                options.non_interactive = true;
                Ok(())
            },
        },
        PamauthOption {
            short: 'p',
            long: "prompt",
            takes_argument: true,
            set: |options, argument| {
                options.prompt = Some(argument.ok_or("option requires an argument -- 'p'")?);
                Ok(())
            },
        },
        PamauthOption {
            short: 'S',
            long: "stdin",
            takes_argument: false,
            set: |options, _| {
                options.stdin = true;
                Ok(())
            },
        },
        PamauthOption {
            short: 's',
            long: "service",
            takes_argument: true,
            set: |options, argument| {
                let service = argument.ok_or("option requires an argument -- 's'")?;
                if service.is_empty() {
                    Err("the service name cannot be empty")?;
                }
                options.service = service;
                Ok(())
            },
        },
        PamauthOption {
            short: 'V',
            long: "version",
            takes_argument: false,
            set: |options, _| {
                options.action = PamauthAction::Version;
                Ok(())
            },
        },
    ];

    pub(crate) fn from_env() -> Result<PamauthOptions, String> {
        let args = std::env::args().collect();

        Self::parse_arguments(args)
    }

    fn positional(&mut self, arg: String) -> Result<(), String> {
        if self.user.is_some() {
            Err(format!("unexpected argument '{arg}'"))?;
        }
        self.user = Some(arg);
        Ok(())
    }

    /// parse pamauth arguments into a PamauthOptions struct
    pub(crate) fn parse_arguments(arguments: Vec<String>) -> Result<PamauthOptions, String> {
        let mut options: PamauthOptions = PamauthOptions::default();
        let mut arg_iter = arguments.into_iter().skip(1);

        while let Some(arg) = arg_iter.next() {
            if arg == "--" {
                // everything after a bare `--` is positional
                for rest in arg_iter.by_ref() {
                    options.positional(rest)?;
                }
            } else if let Some(name) = arg.strip_prefix("--") {
                // parse assignments like '--service=login'
                if let Some((key, value)) = name.split_once('=') {
                    let Some(option) = Self::PAMAUTH_OPTIONS.iter().find(|o| o.long == key) else {
                        return Err(format!("unrecognized option '--{key}'"));
                    };
                    // the value is already present, when the option does not take any arguments this results in an error
                    if option.takes_argument {
                        (option.set)(&mut options, Some(value.to_string()))?;
                    } else {
                        Err(format!("'--{}' does not take any arguments", option.long))?;
                    }
                } else if let Some(option) = Self::PAMAUTH_OPTIONS.iter().find(|o| o.long == name)
                {
                    let argument = if option.takes_argument {
                        arg_iter.next()
                    } else {
                        None
                    };
                    (option.set)(&mut options, argument)?;
                } else {
                    Err(format!("unrecognized option '{arg}'"))?;
                }
            } else if arg.len() > 1 && arg.starts_with('-') {
                // flags can be grouped, so we loop over the characters
                for (n, char) in arg.char_indices().skip(1) {
                    let Some(option) = Self::PAMAUTH_OPTIONS.iter().find(|o| o.short == char)
                    else {
                        return Err(format!("invalid option -- '{char}'"));
                    };
                    if option.takes_argument {
                        // the argument is either the rest of this group or the next argument
                        let rest = &arg[n + char.len_utf8()..];
                        let argument = if rest.is_empty() {
                            arg_iter.next()
                        } else {
                            Some(rest.to_string())
                        };
                        (option.set)(&mut options, argument)?;
                        break;
                    } else {
                        (option.set)(&mut options, None)?;
                    }
                }
            } else {
                options.positional(arg)?;
            }
        }

        Ok(options)
    }
}

#[cfg(test)]
mod test {
    use super::{PamauthAction, PamauthOptions};
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<PamauthOptions, String> {
        let mut arguments = vec!["pamauth".to_string()];
        arguments.extend(args.iter().map(|s| s.to_string()));
        PamauthOptions::parse_arguments(arguments)
    }

    #[test]
    fn defaults() {
        assert_eq!(parse(&[]).unwrap(), PamauthOptions::default());
        assert_eq!(parse(&[]).unwrap().service, "pamauth");
    }

    #[test]
    fn user_and_service() {
        let options = parse(&["-s", "login", "alice"]).unwrap();
        assert_eq!(
            options,
            PamauthOptions {
                service: "login".to_string(),
                user: Some("alice".to_string()),
                ..Default::default()
            }
        );

        assert_eq!(parse(&["--service=su", "bob"]).unwrap().service, "su");
        assert_eq!(parse(&["--service", "su"]).unwrap().service, "su");
        assert_eq!(parse(&["-ssu"]).unwrap().service, "su");
    }

    #[test]
    fn grouped_flags() {
        let options = parse(&["-nSp", "Secret:", "carol"]).unwrap();
        assert!(options.non_interactive);
        assert!(options.stdin);
        assert_eq!(options.prompt.as_deref(), Some("Secret:"));
        assert_eq!(options.user.as_deref(), Some("carol"));

        let options = parse(&["-Sp>"]).unwrap();
        assert!(options.stdin);
        assert_eq!(options.prompt.as_deref(), Some(">"));
    }

    #[test]
    fn help_and_version() {
        assert_eq!(parse(&["-h"]).unwrap().action, PamauthAction::Help);
        assert_eq!(parse(&["--version"]).unwrap().action, PamauthAction::Version);
    }

    #[test]
    fn double_dash_ends_options() {
        let options = parse(&["--", "-weird-name"]).unwrap();
        assert_eq!(options.user.as_deref(), Some("-weird-name"));
    }

    #[test]
    fn errors() {
        assert_eq!(parse(&["-x"]).unwrap_err(), "invalid option -- 'x'");
        assert_eq!(
            parse(&["--frobnicate"]).unwrap_err(),
            "unrecognized option '--frobnicate'"
        );
        assert_eq!(
            parse(&["--stdin=yes"]).unwrap_err(),
            "'--stdin' does not take any arguments"
        );
        assert_eq!(
            parse(&["-s"]).unwrap_err(),
            "option requires an argument -- 's'"
        );
        assert_eq!(
            parse(&["--service="]).unwrap_err(),
            "the service name cannot be empty"
        );
        assert_eq!(
            parse(&["alice", "bob"]).unwrap_err(),
            "unexpected argument 'bob'"
        );
    }
}
