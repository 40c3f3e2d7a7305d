//! The interactive command surface.

use std::path::PathBuf;
use std::str::{FromStr, SplitWhitespace};

use autoproc_codec::Format;
use thiserror::Error;

/// Text printed by `ajuda`.
pub const HELP: &str = "\
Comandos disponíveis:
  iniciar - Inicia o monitoramento de diretórios
  parar - Para o monitoramento e as tarefas programadas
  converter json [on/off] - Ativa/desativa conversão para JSON
  arquivar [on/off] - Ativa/desativa arquivamento de arquivos
  backup [on/off] - Ativa/desativa criação de backups
  processar [caminho] - Processa um arquivo específico
  exportar [formato] - Realiza uma exportação manual (csv, json, xml, excel)
  status - Exibe o status atual do sistema
  ajuda - Exibe esta ajuda
  sair - Encerra o programa";

/// One parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `iniciar`
    Start,
    /// `parar`
    Stop,
    /// `converter json on|off`
    ConvertJson(bool),
    /// `arquivar on|off`
    Archive(bool),
    /// `backup on|off`
    Backup(bool),
    /// `processar <path>`
    Process(PathBuf),
    /// `exportar <format>`
    Export(Format),
    /// `status`
    Status,
    /// `ajuda`
    Help,
    /// `sair`
    Quit,
}

/// A line that is not a valid command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0} (digite 'ajuda')")]
    Unknown(String),

    #[error("{command}: missing argument, expected {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },

    #[error("{command}: invalid argument '{value}', expected {expected}")]
    InvalidArgument {
        command: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{command}: unexpected argument '{value}'")]
    ExtraArgument {
        command: &'static str,
        value: String,
    },
}

/// Reject anything left in `args` after a complete command.
fn end_of_args<T>(
    command: &'static str,
    mut args: SplitWhitespace<'_>,
    parsed: Result<T, CommandError>,
) -> Result<T, CommandError> {
    let parsed = parsed?;
    match args.next() {
        Some(extra) => Err(CommandError::ExtraArgument {
            command,
            value: extra.to_string(),
        }),
        None => Ok(parsed),
    }
}

fn switch(command: &'static str, arg: Option<&str>) -> Result<bool, CommandError> {
    const EXPECTED: &str = "on|off";
    match arg.map(str::to_ascii_lowercase).as_deref() {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        Some(other) => Err(CommandError::InvalidArgument {
            command,
            value: other.to_string(),
            expected: EXPECTED,
        }),
        None => Err(CommandError::MissingArgument {
            command,
            expected: EXPECTED,
        }),
    }
}

fn no_args(command: Command, rest: &str) -> Result<Command, CommandError> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(CommandError::Unknown(rest.to_string()))
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();

        match word.to_ascii_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            "iniciar" => no_args(Self::Start, rest),
            "parar" => no_args(Self::Stop, rest),
            "status" => no_args(Self::Status, rest),
            "ajuda" => no_args(Self::Help, rest),
            "sair" => no_args(Self::Quit, rest),
            "converter" => match args.next() {
                Some(target) if target.eq_ignore_ascii_case("json") => {
                    let parsed = switch("converter json", args.next()).map(Self::ConvertJson);
                    end_of_args("converter json", args, parsed)
                }
                Some(other) => Err(CommandError::InvalidArgument {
                    command: "converter",
                    value: other.to_string(),
                    expected: "json",
                }),
                None => Err(CommandError::MissingArgument {
                    command: "converter",
                    expected: "json on|off",
                }),
            },
            "arquivar" => {
                let parsed = switch("arquivar", args.next()).map(Self::Archive);
                end_of_args("arquivar", args, parsed)
            }
            "backup" => {
                let parsed = switch("backup", args.next()).map(Self::Backup);
                end_of_args("backup", args, parsed)
            }
            "processar" => {
                if rest.is_empty() {
                    Err(CommandError::MissingArgument {
                        command: "processar",
                        expected: "a file path",
                    })
                } else {
                    Ok(Self::Process(PathBuf::from(rest)))
                }
            }
            "exportar" => {
                const EXPECTED: &str = "csv|json|xml|excel";
                let Some(name) = args.next() else {
                    return Err(CommandError::MissingArgument {
                        command: "exportar",
                        expected: EXPECTED,
                    });
                };
                let parsed = autoproc_codec::target_format(name)
                    .map(Self::Export)
                    .map_err(|_| CommandError::InvalidArgument {
                        command: "exportar",
                        value: name.to_string(),
                        expected: EXPECTED,
                    });
                end_of_args("exportar", args, parsed)
            }
            _ => Err(CommandError::Unknown(line.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> Result<Command, CommandError> {
        line.parse()
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("iniciar"), Ok(Command::Start));
        assert_eq!(parse("  PARAR "), Ok(Command::Stop));
        assert_eq!(parse("status"), Ok(Command::Status));
        assert_eq!(parse("ajuda"), Ok(Command::Help));
        assert_eq!(parse("sair"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_switches() {
        assert_eq!(parse("converter json on"), Ok(Command::ConvertJson(true)));
        assert_eq!(parse("converter json OFF"), Ok(Command::ConvertJson(false)));
        assert_eq!(parse("arquivar off"), Ok(Command::Archive(false)));
        assert_eq!(parse("backup on"), Ok(Command::Backup(true)));
        assert!(matches!(
            parse("backup maybe"),
            Err(CommandError::InvalidArgument { .. })
        ));
        assert!(matches!(
            parse("arquivar"),
            Err(CommandError::MissingArgument { .. })
        ));
        assert!(matches!(
            parse("converter xml on"),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_trailing_arguments_are_rejected() {
        assert_eq!(
            parse("converter json on extra"),
            Err(CommandError::ExtraArgument {
                command: "converter json",
                value: "extra".to_string(),
            })
        );
        assert_eq!(
            parse("arquivar on off"),
            Err(CommandError::ExtraArgument {
                command: "arquivar",
                value: "off".to_string(),
            })
        );
        assert!(matches!(
            parse("backup off now"),
            Err(CommandError::ExtraArgument { .. })
        ));
        assert!(matches!(
            parse("exportar csv json"),
            Err(CommandError::ExtraArgument { .. })
        ));
        assert!(matches!(
            parse("arquivar maybe off"),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_parse_process_keeps_spaces() {
        assert_eq!(
            parse("processar /data/in/my report.csv"),
            Ok(Command::Process(PathBuf::from("/data/in/my report.csv")))
        );
        assert!(matches!(
            parse("processar"),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_parse_export() {
        assert_eq!(parse("exportar csv"), Ok(Command::Export(Format::Csv)));
        assert_eq!(parse("exportar excel"), Ok(Command::Export(Format::Spreadsheet)));
        assert!(matches!(
            parse("exportar pdf"),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parse("   "), Err(CommandError::Empty));
        assert_eq!(
            parse("dançar agora"),
            Err(CommandError::Unknown("dançar agora".to_string()))
        );
        assert!(matches!(parse("status agora"), Err(CommandError::Unknown(_))));
    }
}
