use std::fmt;
use std::io;
use std::os::fd::AsFd;
use std::process;

use crate::log::{auth_info, auth_warn, user_error, user_warn};
use crate::pam::{CLIConverser, ConverserConfig, PamContext, PamError, PamErrorType, PamItem};
use crate::system::term::ttyname;

use cli::{PamauthAction, PamauthOptions};
use help::{long_help_message, USAGE_MSG};

mod cli;
mod help;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const MAX_TRIES: u16 = 3;
const DEFAULT_PROMPT: &str = "authenticate";

#[derive(Debug)]
enum Error {
    Pam(PamError),
    MaxAuthAttempts(u16),
    InteractionRequired,
    NoUser,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Pam(e) => write!(f, "{e}"),
            Error::MaxAuthAttempts(num) => {
                write!(f, "Maximum {num} incorrect authentication attempts")
            }
            Error::InteractionRequired => write!(f, "interaction required"),
            Error::NoUser => write!(f, "no user given and $USER is not set"),
        }
    }
}

impl From<PamError> for Error {
    fn from(err: PamError) -> Self {
        Error::Pam(err)
    }
}

fn converser_config(options: &PamauthOptions) -> ConverserConfig {
    ConverserConfig {
        name: "pamauth".to_string(),
        use_stdin: options.stdin,
        bell: false,
        no_interact: options.non_interactive,
        auth_prompt: Some(
            options
                .prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        ),
    }
}

fn authenticate(
    pam: &mut PamContext<CLIConverser>,
    user: &str,
    non_interactive: bool,
) -> Result<(), Error> {
    let mut max_tries = MAX_TRIES;
    let mut current_try = 0;

    loop {
        current_try += 1;
        match pam.authenticate(user) {
            // there was no error, so authentication succeeded
            Ok(_) => return Ok(()),

            // maxtries was reached, pam does not allow any more tries
            Err(PamError::Pam(PamErrorType::MaxTries)) => {
                return Err(Error::MaxAuthAttempts(current_try));
            }

            // there was an authentication error, we can retry
            Err(PamError::Pam(PamErrorType::AuthError)) => {
                max_tries -= 1;
                if max_tries == 0 {
                    return Err(Error::MaxAuthAttempts(current_try));
                } else if non_interactive {
                    return Err(Error::InteractionRequired);
                } else {
                    user_warn!("Authentication failed, try again.");
                }
            }

            // there was another pam error, return the error
            Err(e) => return Err(e.into()),
        }
    }
}

fn run(options: PamauthOptions) -> Result<(), Error> {
    let requesting_user = std::env::var("USER").ok();
    let user = options
        .user
        .clone()
        .or_else(|| requesting_user.clone())
        .ok_or(Error::NoUser)?;

    let converser = CLIConverser::new(converser_config(&options));
    let mut pam = PamContext::new(&options.service, Some(&user), converser)?;

    if let Some(requesting_user) = requesting_user.as_deref() {
        pam.set_item(PamItem::RemoteUser, requesting_user)?;
    }

    // attempt to set the TTY this session is communicating on
    if let Ok(tty) = ttyname(io::stdin().as_fd()) {
        pam.set_item(PamItem::Tty, &tty.to_string_lossy())?;
    }

    pam.mark_allow_null_auth_token(false);

    let outcome = authenticate(&mut pam, &user, options.non_interactive)
        .and_then(|()| pam.validate_account_or_change_auth_token().map_err(Error::from));

    let service = &options.service;
    match &outcome {
        Ok(()) => auth_info!("authentication of {user} for service {service} succeeded"),
        Err(e) => auth_warn!("authentication of {user} for service {service} failed: {e}"),
    }

    outcome
}

pub fn main() {
    crate::log::BridgeLogger::new("pamauth: ").into_global_logger();

    let options = match PamauthOptions::from_env() {
        Ok(options) => options,
        Err(error) => {
            eprintln_ignore_io_error!("pamauth: {error}\n{USAGE_MSG}");
            process::exit(2);
        }
    };

    match options.action {
        PamauthAction::Help => {
            println_ignore_io_error!("{}", long_help_message());
            process::exit(0);
        }
        PamauthAction::Version => {
            println_ignore_io_error!("pamauth {VERSION}");
            process::exit(0);
        }
        PamauthAction::Authenticate => match run(options) {
            Ok(()) => process::exit(0),
            Err(error) => {
                user_error!("{error}");
                process::exit(1);
            }
        },
    }
}
