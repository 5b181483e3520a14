pub(crate) const USAGE_MSG: &str = "usage: pamauth [-hnSV] [-s service] [-p prompt] [user]";

const DESCRIPTOR: &str = "pamauth - check a user's credentials through PAM";

const HELP_MSG: &str = "Options:
  -h, --help                 display help message and exit
  -n, --non-interactive      fail instead of asking for input
  -p, --prompt=prompt        use the specified password prompt
  -S, --stdin                read input from standard input instead of the terminal
  -s, --service=service      authenticate against this PAM service (default: pamauth)
  -V, --version              display version information and exit

Without a user, the name in $USER is authenticated.
";

pub(crate) fn long_help_message() -> String {
    format!("{USAGE_MSG}\n\n{DESCRIPTOR}\n\n{HELP_MSG}")
}
