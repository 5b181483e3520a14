use log::{Level, Log, Metadata};

use crate::system::syslog;

/// Longest message handed to syslog in one piece; longer ones are split.
const LIMIT: usize = 960;

pub struct Syslog;

/// Cut `message` into pieces of at most `limit` bytes, preferably after a
/// whitespace. Continued pieces are marked with `[...]` on both sides of the
/// cut.
fn split_message(message: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = message;

    while rest.len() > limit {
        let mut end = limit;
        // floor_char_boundary is currently unstable
        while !rest.is_char_boundary(end) {
            end -= 1;
        }

        if let Some((at, ws)) = rest[..end]
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
        {
            end = at + ws.len_utf8();
        }

        pieces.push(&rest[..end]);
        rest = &rest[end..];
    }
    pieces.push(rest);

    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let head = if i > 0 { "[...] " } else { "" };
            let tail = if i < last { "[...]" } else { "" };
            format!("{head}{piece}{tail}")
        })
        .collect()
}

impl Log for Syslog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && metadata.level() <= log::STATIC_MAX_LEVEL
    }

    fn log(&self, record: &log::Record) {
        let priority = match record.level() {
            Level::Error => libc::LOG_ERR,
            Level::Warn => libc::LOG_WARNING,
            Level::Info => libc::LOG_INFO,
            Level::Debug => libc::LOG_DEBUG,
            Level::Trace => libc::LOG_DEBUG,
        };

        let message = record.args().to_string();
        for piece in split_message(&message, LIMIT) {
            syslog(priority, libc::LOG_AUTH, &piece);
        }
    }

    fn flush(&self) {
        // pass
    }
}
