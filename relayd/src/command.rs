//! Command Dispatcher (SPEC_FULL.md §4.3).
//!
//! Operates on a single line already read from a client's management socket.
//! Command *names* are injected configuration; the behavior per kind is
//! fixed by the core.

use crate::config::CommandNames;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ack,
    Sch,
    Dis,
    Png,
    Ssu,
    /// Sent unprompted right after accept; never matched against an incoming line.
    StreamReady,
    Ao,
    Ai,
    Do,
    Di,
}

/// Outcome of dispatching one line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Full line to write back on the management socket, if any.
    pub reply: Option<String>,
    /// Whether the client asked to disconnect (DIS).
    pub quit: bool,
}

/// Matches `line` (already stripped of its trailing `\n`/`\r`) against the
/// injected command table by prefix, and produces the reply (if any).
///
/// Unknown lines are discarded silently: this returns an empty [`Dispatch`].
pub fn dispatch_line(line: &str, names: &CommandNames, stream_port: u16) -> Dispatch {
    let table = names.table();

    let Some((kind, _)) = table.into_iter().find(|(_, name)| line.starts_with(name)) else {
        return Dispatch::default();
    };

    match kind {
        CommandKind::Ack | CommandKind::Sch | CommandKind::Ao | CommandKind::Ai | CommandKind::Do | CommandKind::Di => {
            Dispatch::default()
        }
        CommandKind::Dis => Dispatch {
            reply: None,
            quit: true,
        },
        CommandKind::Png => Dispatch {
            reply: Some(format!("{}\n", names.png)),
            quit: false,
        },
        CommandKind::Ssu => Dispatch {
            reply: Some(format!("port:{stream_port}\n")),
            quit: false,
        },
        CommandKind::StreamReady => unreachable!("StreamReady is never part of the match table"),
    }
}

/// The literal reply sent right after a client is accepted and its Stream is open.
pub fn stream_ready_reply(names: &CommandNames) -> String {
    format!("{}\n", names.sry)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("ACK", None, false)]
    #[case("SCH", None, false)]
    #[case("PNG", Some("PNG\n".to_owned()), false)]
    #[case("SSU", Some("port:10500\n".to_owned()), false)]
    #[case("DIS", None, true)]
    #[case("AO", None, false)]
    #[case("AI", None, false)]
    #[case("DO", None, false)]
    #[case("DI", None, false)]
    fn known_commands_produce_expected_dispatch(
        #[case] line: &str,
        #[case] expected_reply: Option<String>,
        #[case] expected_quit: bool,
    ) {
        let names = CommandNames::default();
        let dispatch = dispatch_line(line, &names, 10500);
        assert_eq!(dispatch.reply, expected_reply);
        assert_eq!(dispatch.quit, expected_quit);
    }

    #[test]
    fn unknown_command_is_discarded_silently() {
        let names = CommandNames::default();
        let dispatch = dispatch_line("HELLO", &names, 10500);
        assert_eq!(dispatch, Dispatch::default());
    }

    #[test]
    fn ping_is_idempotent_across_repeated_sends() {
        let names = CommandNames::default();
        for _ in 0..5 {
            let dispatch = dispatch_line("PNG", &names, 10500);
            assert_eq!(dispatch.reply.as_deref(), Some("PNG\n"));
            assert!(!dispatch.quit);
        }
    }

    #[test]
    fn ssu_reports_the_allocated_port_not_a_placeholder() {
        let names = CommandNames::default();
        let dispatch = dispatch_line("SSU", &names, 10501);
        assert_eq!(dispatch.reply.as_deref(), Some("port:10501\n"));
    }

    #[test]
    fn stream_ready_reply_uses_injected_name() {
        let mut names = CommandNames::default();
        names.sry = "READY".to_owned();
        assert_eq!(stream_ready_reply(&names), "READY\n");
    }
}
