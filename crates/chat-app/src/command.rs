use std::path::PathBuf;

use snafu::{OptionExt, Snafu, ensure};

/// One line of shell input. Space positions are 1-based as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Broadcast(String),
    New,
    Remove(usize),
    Clear(usize),
    Model { position: usize, model_id: String },
    System { position: usize, text: String },
    Global(String),
    To { position: usize, text: String },
    Models,
    Refresh,
    Spaces,
    Export {
        position: Option<usize>,
        path: Option<PathBuf>,
    },
    Help,
    Quit,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("unknown command `/{name}`, try /help"))]
    UnknownCommand { name: String },
    #[snafu(display("/{command} needs {argument}"))]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[snafu(display("/{command}: `{value}` is not a space number"))]
    InvalidPosition {
        command: &'static str,
        value: String,
    },
    #[snafu(display("/{command} takes no arguments"))]
    UnexpectedArgument { command: &'static str },
}

pub const HELP: &str = "\
Type a message to send it to every space.

  /new                  add a space
  /rm N                 remove space N
  /clear N              clear the history of space N
  /model N ID           bind space N to model ID (empty, idle spaces only)
  /system N [TEXT]      set or reset the system prompt of space N
  /global [TEXT]        set or reset the global system prompt
  /to N TEXT            send TEXT to space N only
  /models               list available models
  /refresh              reload the model catalog
  /spaces               list spaces
  /export [N] [PATH]    write space N (or all spaces) as markdown
  /help                 show this help
  /quit                 exit";

impl Command {
    /// Parses one input line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let Some(body) = line.strip_prefix('/') else {
            return Ok(Some(Self::Broadcast(line.to_string())));
        };

        let (name, rest) = split_word(body);
        let command = match name {
            "new" => no_arguments("new", rest, Self::New)?,
            "rm" | "remove" => Self::Remove(position("rm", rest)?),
            "clear" => Self::Clear(position("clear", rest)?),
            "model" => {
                let (value, model_id) = split_word(rest);
                let position = parse_position("model", value)?;
                ensure!(
                    !model_id.is_empty(),
                    MissingArgumentSnafu {
                        command: "model",
                        argument: "a model id",
                    }
                );
                Self::Model {
                    position,
                    model_id: model_id.to_string(),
                }
            }
            "system" => {
                let (value, text) = split_word(rest);
                Self::System {
                    position: parse_position("system", value)?,
                    text: text.to_string(),
                }
            }
            "global" => Self::Global(rest.to_string()),
            "to" => {
                let (value, text) = split_word(rest);
                let position = parse_position("to", value)?;
                ensure!(
                    !text.is_empty(),
                    MissingArgumentSnafu {
                        command: "to",
                        argument: "a message",
                    }
                );
                Self::To {
                    position,
                    text: text.to_string(),
                }
            }
            "models" => no_arguments("models", rest, Self::Models)?,
            "refresh" => no_arguments("refresh", rest, Self::Refresh)?,
            "spaces" => no_arguments("spaces", rest, Self::Spaces)?,
            "export" => parse_export(rest)?,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => {
                return UnknownCommandSnafu {
                    name: other.to_string(),
                }
                .fail();
            }
        };

        Ok(Some(command))
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn no_arguments(command: &'static str, rest: &str, value: Command) -> Result<Command, CommandError> {
    ensure!(rest.is_empty(), UnexpectedArgumentSnafu { command });
    Ok(value)
}

fn position(command: &'static str, rest: &str) -> Result<usize, CommandError> {
    let (value, extra) = split_word(rest);
    let position = parse_position(command, value)?;
    ensure!(extra.is_empty(), UnexpectedArgumentSnafu { command });
    Ok(position)
}

fn parse_position(command: &'static str, value: &str) -> Result<usize, CommandError> {
    ensure!(
        !value.is_empty(),
        MissingArgumentSnafu {
            command,
            argument: "a space number",
        }
    );
    value
        .parse::<usize>()
        .ok()
        .filter(|position| *position > 0)
        .context(InvalidPositionSnafu { command, value })
}

fn parse_export(rest: &str) -> Result<Command, CommandError> {
    let (first, remainder) = split_word(rest);
    if first.is_empty() {
        return Ok(Command::Export {
            position: None,
            path: None,
        });
    }

    match first.parse::<usize>() {
        Ok(position) => {
            ensure!(
                position > 0,
                InvalidPositionSnafu {
                    command: "export",
                    value: first,
                }
            );
            Ok(Command::Export {
                position: Some(position),
                path: Some(remainder).filter(|path| !path.is_empty()).map(PathBuf::from),
            })
        }
        Err(_) => Ok(Command::Export {
            position: None,
            path: Some(PathBuf::from(rest.trim())),
        }),
    }
}
